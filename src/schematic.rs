//! The schematic packer.
//!
//! Collects blocks and processors as the evaluator emits them, then places
//! everything in two passes: blocks first (preplaced ones at their declared
//! cells, the rest scanned along the row below the origin), then processors
//! (explicit positions first, the remainder gridded row-major into the
//! smallest square that fits). Link tables are written last, once every
//! position is final, so the relative offsets are exact.

use std::collections::HashMap;
use std::mem;

use tracing::debug;

use crate::error::{print_warning, TranspileError};
use crate::msch::{Config, Content, ProcessorConfig, ProcessorLink, Schematic, PROCESSOR_TYPES};
use crate::token::Token;

/// A `block` directive waiting to be placed.
#[derive(Debug)]
pub struct BlockEntry {
    pub head: Token,
    pub type_token: Token,
    /// Registry name, `@` stripped.
    pub type_name: String,
    pub pos: Option<(i32, i32)>,
    pub rotation: u8,
    pub link_name: String,
    pub trace: Vec<Token>,
}

/// A `proc` directive waiting to be placed.
#[derive(Debug)]
pub struct ProcEntry {
    pub code: String,
    pub pos: Option<(i32, i32)>,
    pub proc_type: Option<Token>,
    pub head: Token,
    pub trace: Vec<Token>,
}

#[derive(Debug, Default)]
pub struct SchemBuilder {
    procs: Vec<ProcEntry>,
    blocks: Vec<BlockEntry>,
    link_counts: HashMap<String, u32>,
    /// Default type for unpositioned processors, taken from
    /// `$PROCESSOR_TYPE` at root completion.
    pub processor_type: Option<Token>,
    schem: Schematic,
    /// Placed processors in placement order: schematic index and origin.
    placed: Vec<(usize, (i32, i32))>,
}

impl SchemBuilder {
    pub fn new() -> SchemBuilder {
        SchemBuilder::default()
    }

    pub fn set_name(&mut self, name: &str) {
        self.schem.set_tag("name", name);
    }

    pub fn set_desc(&mut self, desc: &str) {
        self.schem.set_tag("description", desc);
    }

    /// Register a processor; its link name is its 1-based ordinal.
    pub fn add_proc(&mut self, proc: ProcEntry) -> String {
        self.procs.push(proc);
        format!("processor{}", self.procs.len())
    }

    /// Register a block and hand back its generated link name.
    pub fn add_block(&mut self, mut block: BlockEntry) -> String {
        let name = self.link_name(&block.type_name);
        block.link_name = name.clone();
        self.blocks.push(block);
        name
    }

    /// Derive the link stem from the type name: the last hyphen segment,
    /// or the one before it when the last is `large`.
    fn link_name(&mut self, type_name: &str) -> String {
        let words: Vec<&str> = type_name.split('-').collect();
        let stem = match words.as_slice() {
            [.., second_last, "large"] => *second_last,
            [.., last] => *last,
            [] => type_name,
        };
        let count = self.link_counts.entry(stem.to_string()).or_insert(0);
        *count += 1;
        format!("{}{}", stem, count)
    }

    /// Place everything and fill link tables.
    pub fn make_schem(&mut self) -> Result<(), TranspileError> {
        self.place_blocks()?;
        self.place_positioned_procs()?;
        self.place_unpositioned_procs()?;
        self.write_links();
        Ok(())
    }

    pub fn take_schematic(&mut self) -> Schematic {
        mem::take(&mut self.schem)
    }

    fn place_blocks(&mut self) -> Result<(), TranspileError> {
        let mut block_x = 0;
        for block in &mut self.blocks {
            if block
                .type_name
                .chars()
                .any(|c| c == '_' || c.is_ascii_uppercase())
            {
                return Err(TranspileError::at("Unknown block type", block.type_token.clone())
                    .with_trace(block.trace.clone()));
            }
            let content = Content::from_name(&block.type_name).ok_or_else(|| {
                TranspileError::at("Unknown block type", block.type_token.clone())
                    .with_trace(block.trace.clone())
            })?;
            if content.is_processor() {
                return Err(TranspileError::at(
                    "Block type must not be a processor, use 'proc'",
                    block.type_token.clone(),
                )
                .with_trace(block.trace.clone()));
            }
            match block.pos {
                None => {
                    let y = -(content.size / 2) - 1;
                    loop {
                        if self
                            .schem
                            .add_block(content, block_x, y, Config::None, 0)
                            .is_some()
                        {
                            block.pos = Some((block_x, y));
                            debug!(name = block.link_name, x = block_x, y, "placed block");
                            break;
                        }
                        block_x += 1;
                    }
                }
                Some((x, y)) => {
                    if self
                        .schem
                        .add_block(content, x, y, Config::None, block.rotation)
                        .is_none()
                    {
                        print_warning(
                            &format!("Specified position at ({}, {}) is blocked", x, y),
                            &block.head,
                            &block.trace,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn place_positioned_procs(&mut self) -> Result<(), TranspileError> {
        for proc in &self.procs {
            let Some(pos) = proc.pos else { continue };
            let type_token = proc.proc_type.as_ref().unwrap_or(&proc.head);
            let content = processor_content(type_token, &proc.trace)?;
            let config = Config::Processor(ProcessorConfig {
                code: proc.code.clone(),
                links: Vec::new(),
            });
            match self.schem.add_block(content, pos.0, pos.1, config, 0) {
                Some(index) => {
                    self.placed.push((index, pos));
                    debug!(x = pos.0, y = pos.1, "placed processor");
                }
                None => print_warning(
                    &format!("Specified position at ({}, {}) is blocked", pos.0, pos.1),
                    &proc.head,
                    &proc.trace,
                ),
            }
        }
        Ok(())
    }

    fn place_unpositioned_procs(&mut self) -> Result<(), TranspileError> {
        let type_token = self
            .processor_type
            .clone()
            .unwrap_or_else(|| Token::content("@micro-processor"));
        let content = processor_content(&type_token, &[])?;
        let size = content.size;
        let pending: Vec<usize> = (0..self.procs.len())
            .filter(|&i| self.procs[i].pos.is_none())
            .collect();

        let mut square = (pending.len() as f64).sqrt().ceil() as i32 * size;
        while self.count_filled(size, square) + pending.len() as i32 > square * square {
            square += 1;
        }
        debug!(procs = pending.len(), square, "gridding processors");

        let start = (size + 1) / 2 - 1;
        let mut proc_x = start;
        let mut proc_y = start;
        for index in pending {
            let proc = &self.procs[index];
            let config = Config::Processor(ProcessorConfig {
                code: proc.code.clone(),
                links: Vec::new(),
            });
            loop {
                if proc_x >= square {
                    proc_x = start;
                    proc_y += size;
                }
                match self
                    .schem
                    .add_block(content, proc_x, proc_y, config.clone(), 0)
                {
                    Some(placed_index) => {
                        self.placed.push((placed_index, (proc_x, proc_y)));
                        break;
                    }
                    None => proc_x += size,
                }
            }
            proc_x += size;
        }
        Ok(())
    }

    /// Count grid cells (in processor-size units) that already hold
    /// something, within the placement square.
    fn count_filled(&self, size: i32, square: i32) -> i32 {
        let mut count = 0;
        for x in 0..square {
            for y in 0..square {
                let occupied = (0..size).any(|px| {
                    (0..size).any(|py| self.schem.is_filled(x * size + px, y * size + py))
                });
                if occupied {
                    count += 1;
                }
            }
        }
        count
    }

    fn write_links(&mut self) {
        let positions: Vec<(i32, i32)> = self.placed.iter().map(|&(_, pos)| pos).collect();
        for &(index, pos) in &self.placed {
            let mut links = Vec::new();
            for block in &self.blocks {
                if let Some((bx, by)) = block.pos {
                    links.push(ProcessorLink {
                        x: bx - pos.0,
                        y: by - pos.1,
                        name: block.link_name.clone(),
                    });
                }
            }
            for (i, &(px, py)) in positions.iter().enumerate() {
                links.push(ProcessorLink {
                    x: px - pos.0,
                    y: py - pos.1,
                    name: format!("processor{}", i + 1),
                });
            }
            if let Config::Processor(config) = &mut self.schem.block_mut(index).config {
                config.links = links;
            }
        }
    }
}

fn processor_content(type_token: &Token, trace: &[Token]) -> Result<Content, TranspileError> {
    let name = type_token
        .lexeme()
        .and_then(|v| v.strip_prefix('@'))
        .ok_or_else(|| {
            TranspileError::at("Unknown processor type", type_token.clone())
                .with_trace(trace.to_vec())
        })?;
    if !PROCESSOR_TYPES.contains(&name) {
        return Err(
            TranspileError::at("Unknown processor type", type_token.clone())
                .with_trace(trace.to_vec()),
        );
    }
    Content::from_name(name).ok_or_else(|| {
        TranspileError::at("Unknown processor type", type_token.clone()).with_trace(trace.to_vec())
    })
}
