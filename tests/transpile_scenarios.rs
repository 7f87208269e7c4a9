//! End-to-end transpilation scenarios.

use std::path::Path;

use sfmlog::msch::Config;
use sfmlog::{transpile, Schematic};

fn build(source: &str) -> Schematic {
    transpile(source, Path::new("main.sfm")).expect("transpile failed")
}

fn proc_codes(schem: &Schematic) -> Vec<String> {
    schem
        .processor_codes()
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[test]
fn minimum_emission_is_one_processor() {
    let schem = build("proc\nset x 1\nend");
    assert_eq!(proc_codes(&schem), vec!["set x 1\n"]);
}

#[test]
fn macro_arguments_substitute_into_the_body() {
    let schem = build("defmac m a\nset a 1\nend\nproc\nmac m foo\nmac m foo\nend");
    assert_eq!(proc_codes(&schem), vec!["set foo 1\nset foo 1\n"]);
}

#[test]
fn macro_expansions_get_distinct_scope_stamps() {
    let schem = build("defmac m a\nset a tmp\nend\nproc\nmac m foo\nmac m foo\nend");
    assert_eq!(
        proc_codes(&schem),
        vec!["set foo m_m_0_tmp\nset foo m_m_1_tmp\n"]
    );
}

#[test]
fn function_call_emits_trampoline_and_single_body() {
    let schem = build("deffun f >x <y\nop add y x 1\nend\nproc\nfun f 3 r\nend");
    let expected = "set f_f_x 3\n\
                    op add function_f_return @counter 1\n\
                    jump function_f always\n\
                    set r f_f_y\n\
                    end\n\
                    function_f:\n\
                    op add f_f_y f_f_x 1\n\
                    set @counter function_f_return\n";
    assert_eq!(proc_codes(&schem), vec![expected.to_string()]);
}

#[test]
fn function_body_is_emitted_once_for_many_calls() {
    let schem = build("deffun f >x\nprint x\nend\nproc\nfun f 1\nfun f 2\nend");
    let codes = proc_codes(&schem);
    let body_count = codes[0].matches("function_f:").count();
    assert_eq!(body_count, 1);
}

#[test]
fn compile_time_loop_adds_three_message_blocks() {
    let schem = build("for range i 3\nblock b1 @message\nend\nproc p\nend");
    let messages: Vec<(i32, i32)> = schem
        .blocks()
        .iter()
        .filter(|b| b.content.name == "message")
        .map(|b| (b.x, b.y))
        .collect();
    assert_eq!(messages, vec![(0, -1), (1, -1), (2, -1)]);

    let config = schem
        .blocks()
        .iter()
        .find_map(|b| match &b.config {
            Config::Processor(c) => Some(c),
            Config::None => None,
        })
        .expect("a processor");
    for name in ["message1", "message2", "message3"] {
        assert!(
            config.links.iter().any(|l| l.name == name),
            "missing link {}",
            name
        );
    }
}

#[test]
fn if_elif_else_runs_only_the_matching_section() {
    let schem = build(
        "proc\npset x 2\nif equal x 1\nset a 1\nelif equal x 2\nset b 2\nelse\nset c 3\nend\nend",
    );
    assert_eq!(proc_codes(&schem), vec!["set b 2\n"]);
}

#[test]
fn else_section_runs_when_nothing_matches() {
    let schem = build(
        "proc\npset x 9\nif equal x 1\nset a 1\nelif equal x 2\nset b 2\nelse\nset c 3\nend\nend",
    );
    assert_eq!(proc_codes(&schem), vec!["set c 3\n"]);
}

#[test]
fn three_processors_grid_row_major_with_full_link_tables() {
    let schem = build(
        "block m @message\nproc\nprint 1\nend\nproc\nprint 2\nend\nproc\nprint 3\nend",
    );
    let procs: Vec<(i32, i32)> = schem
        .blocks()
        .iter()
        .filter(|b| b.content.name == "micro-processor")
        .map(|b| (b.x, b.y))
        .collect();
    assert_eq!(procs, vec![(0, 0), (1, 0), (0, 1)]);

    for block in schem.blocks() {
        if let Config::Processor(config) = &block.config {
            assert!(config.links.iter().any(|l| l.name == "message1"));
            for i in 1..=3 {
                assert!(config.links.iter().any(|l| l.name == format!("processor{}", i)));
            }
        }
    }
}

#[test]
fn nested_procs_become_separate_processors() {
    let schem = build("proc\nprint 1\nproc\nprint 2\nend\nend");
    let mut codes = proc_codes(&schem);
    codes.sort();
    assert_eq!(codes, vec!["print 1\n", "print 2\n"]);
}

#[test]
fn positioned_proc_requires_a_type() {
    let err = transpile("proc p @micro-processor\nend", Path::new("main.sfm")).unwrap_err();
    assert!(err.message.contains("without defined position"));
}

#[test]
fn positioned_proc_lands_at_its_cell() {
    let schem = build("proc p @micro-processor 3 4\nset x 1\nend");
    let block = &schem.blocks()[0];
    assert_eq!((block.x, block.y), (3, 4));
}

#[test]
fn proc_link_name_crosses_processors_through_a_global() {
    let schem = build("proc $p\nend\nproc\nprint $p\nend");
    let codes = proc_codes(&schem);
    assert!(codes.contains(&"print processor1\n".to_string()));
}

#[test]
fn emitting_at_root_level_fails() {
    let err = transpile("set x 1", Path::new("main.sfm")).unwrap_err();
    assert!(err.message.contains("not allowed outside a 'proc'"));
}

#[test]
fn missing_end_is_reported() {
    let err = transpile("proc\nset x 1", Path::new("main.sfm")).unwrap_err();
    assert!(err.message.contains("'end' expected"));
}

#[test]
fn labels_inside_macros_are_scoped() {
    let schem = build("defmac m\nskip:\njump skip always\nend\nproc\nmac m\nend");
    assert_eq!(
        proc_codes(&schem),
        vec!["m_m_0_skip:\njump m_m_0_skip always\n"]
    );
}

#[test]
fn strlabel_builds_a_label_from_a_string() {
    let schem = build("proc\nstrlabel \"my label\"\nend");
    assert_eq!(proc_codes(&schem), vec!["my_label:\n"]);
}

#[test]
fn collections_cannot_be_emitted() {
    let err = transpile(
        "proc\nlist from lst 1 2\nprint lst\nend",
        Path::new("main.sfm"),
    )
    .unwrap_err();
    assert!(err.message.contains("Unable to output type 'list'"));
}

#[test]
fn error_traceback_points_through_the_macro_call() {
    let err = transpile(
        "defmac m\nerror \"inside\"\nend\nmac m",
        Path::new("main.sfm"),
    )
    .unwrap_err();
    assert_eq!(err.message, "inside");
    let rendered = err.render_traceback();
    // The `mac m` call is on line 4; the error instruction on line 2.
    assert!(rendered.contains("(4,1)"), "traceback: {}", rendered);
    assert!(rendered.contains("(2,1)"), "traceback: {}", rendered);
}

#[test]
fn global_labels_and_identifiers_render_prefixed() {
    let schem = build("proc\n$top:\nset $count 0\njump $top always\nend");
    assert_eq!(
        proc_codes(&schem),
        vec!["global_top:\nset global_count 0\njump global_top always\n"]
    );
}
