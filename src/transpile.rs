//! End-to-end transpilation: source text in, packed schematic out.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use crate::error::TranspileError;
use crate::eval::Evaluator;
use crate::lexer::tokenize;
use crate::msch::Schematic;
use crate::schematic::SchemBuilder;

/// Tokenize and evaluate `source`, then pack the resulting blocks and
/// processors into a schematic. `file` is the source's path, used for
/// diagnostics and relative-path resolution.
pub fn transpile(source: &str, file: &Path) -> Result<Schematic, TranspileError> {
    let tokens = tokenize(source, Some(Rc::new(file.to_path_buf())))?;
    debug!(tokens = tokens.len(), "tokenized");
    let builder = Rc::new(RefCell::new(SchemBuilder::new()));
    let cwd = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let mut root = Evaluator::new_root(tokens, cwd, Some(Rc::clone(&builder)));
    root.execute()?;
    drop(root);
    let mut builder = builder.borrow_mut();
    builder.make_schem()?;
    Ok(builder.take_schematic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_source_produces_an_empty_schematic() {
        let schem = transpile("", &PathBuf::from("main.sfm")).unwrap();
        assert!(schem.blocks().is_empty());
        assert_eq!(schem.tag("name"), Some("SFMlog Schematic"));
    }

    #[test]
    fn schematic_globals_override_the_tags() {
        let source = "pset $SCHEMATIC_NAME \"My Factory\"\npset $SCHEMATIC_DESCRIPTION \"desc\"";
        let schem = transpile(source, &PathBuf::from("main.sfm")).unwrap();
        assert_eq!(schem.tag("name"), Some("My Factory"));
        assert_eq!(schem.tag("description"), Some("desc"));
    }

    #[test]
    fn default_description_mentions_the_tool() {
        let schem = transpile("", &PathBuf::from("main.sfm")).unwrap();
        assert_eq!(
            schem.tag("description"),
            Some("This schematic was generated using SFMlog.")
        );
    }
}
