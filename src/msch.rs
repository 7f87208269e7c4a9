//! Schematic container and binary writer.
//!
//! A schematic is a grid of placed blocks with tags and per-processor
//! configs. The on-disk form is the game's `msch` container: a 4-byte magic,
//! a version byte, and a zlib-compressed payload of big-endian records.
//! Processor configs nest a second compressed record holding the mlog code
//! and the link table.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::ZlibEncoder;
use flate2::Compression;

const MAGIC: &[u8; 4] = b"msch";
const VERSION: u8 = 1;

pub const PROCESSOR_TYPES: &[&str] = &[
    "micro-processor",
    "logic-processor",
    "hyper-processor",
    "world-processor",
];

/// A block type from the game's catalog: its registry name and footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Content {
    pub name: &'static str,
    pub size: i32,
}

impl Content {
    pub fn from_name(name: &str) -> Option<Content> {
        CONTENT_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(name, size)| Content { name, size })
    }

    pub fn is_processor(self) -> bool {
        PROCESSOR_TYPES.contains(&self.name)
    }
}

/// A relative link from a processor to a peer block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorLink {
    pub x: i32,
    pub y: i32,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    pub code: String,
    pub links: Vec<ProcessorLink>,
}

#[derive(Debug, Clone, Default)]
pub enum Config {
    #[default]
    None,
    Processor(ProcessorConfig),
}

#[derive(Debug, Clone)]
pub struct PlacedBlock {
    pub content: Content,
    pub x: i32,
    pub y: i32,
    pub config: Config,
    pub rotation: u8,
}

impl PlacedBlock {
    /// Grid cells covered by this block. Even-sized blocks extend one cell
    /// further up-right of the origin than down-left.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let size = self.content.size;
        let lo = -((size - 1) / 2);
        let hi = size / 2;
        (lo..=hi).flat_map(move |dx| (lo..=hi).map(move |dy| (self.x + dx, self.y + dy)))
    }
}

#[derive(Debug, Default)]
pub struct Schematic {
    tags: Vec<(String, String)>,
    blocks: Vec<PlacedBlock>,
    filled: HashSet<(i32, i32)>,
}

impl Schematic {
    pub fn new() -> Schematic {
        Schematic::default()
    }

    pub fn set_tag(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.tags.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.tags.push((key.to_string(), value.to_string()));
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Place a block. Returns its index, or `None` if any covered cell is
    /// already occupied.
    pub fn add_block(
        &mut self,
        content: Content,
        x: i32,
        y: i32,
        config: Config,
        rotation: u8,
    ) -> Option<usize> {
        let block = PlacedBlock {
            content,
            x,
            y,
            config,
            rotation,
        };
        let cells: Vec<(i32, i32)> = block.cells().collect();
        if cells.iter().any(|cell| self.filled.contains(cell)) {
            return None;
        }
        self.filled.extend(cells);
        self.blocks.push(block);
        Some(self.blocks.len() - 1)
    }

    pub fn is_filled(&self, x: i32, y: i32) -> bool {
        self.filled.contains(&(x, y))
    }

    pub fn blocks(&self) -> &[PlacedBlock] {
        &self.blocks
    }

    pub fn block_mut(&mut self, index: usize) -> &mut PlacedBlock {
        &mut self.blocks[index]
    }

    /// The processors' programs in placement order.
    pub fn processor_codes(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match &b.config {
                Config::Processor(config) => Some(config.code.as_str()),
                Config::None => None,
            })
            .collect()
    }

    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let mut payload = Vec::new();

        let (min, max) = self.extent();
        let width = (max.0 - min.0 + 1).max(0) as i16;
        let height = (max.1 - min.1 + 1).max(0) as i16;
        write_i16(&mut payload, width);
        write_i16(&mut payload, height);

        payload.push(self.tags.len() as u8);
        for (key, value) in &self.tags {
            write_utf(&mut payload, key);
            write_utf(&mut payload, value);
        }

        let mut dictionary: Vec<&str> = Vec::new();
        for block in &self.blocks {
            if !dictionary.contains(&block.content.name) {
                dictionary.push(block.content.name);
            }
        }
        payload.push(dictionary.len() as u8);
        for name in &dictionary {
            write_utf(&mut payload, name);
        }

        write_i32(&mut payload, self.blocks.len() as i32);
        for block in &self.blocks {
            let index = dictionary
                .iter()
                .position(|n| *n == block.content.name)
                .unwrap_or(0);
            payload.push(index as u8);
            let x = block.x - min.0;
            let y = block.y - min.1;
            write_i32(&mut payload, (x << 16) | (y & 0xffff));
            write_config(&mut payload, &block.config)?;
            payload.push(block.rotation);
        }

        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        out.extend_from_slice(&encoder.finish()?);
        Ok(out)
    }

    /// The shareable text form: base64 of the binary container.
    pub fn to_base64(&self) -> io::Result<String> {
        Ok(STANDARD.encode(self.serialize()?))
    }

    pub fn write_file(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.serialize()?)
    }

    fn extent(&self) -> ((i32, i32), (i32, i32)) {
        let mut min = (i32::MAX, i32::MAX);
        let mut max = (i32::MIN, i32::MIN);
        for block in &self.blocks {
            for (x, y) in block.cells() {
                min.0 = min.0.min(x);
                min.1 = min.1.min(y);
                max.0 = max.0.max(x);
                max.1 = max.1.max(y);
            }
        }
        if self.blocks.is_empty() {
            ((0, 0), (-1, -1))
        } else {
            (min, max)
        }
    }
}

fn write_config(out: &mut Vec<u8>, config: &Config) -> io::Result<()> {
    match config {
        Config::None => out.push(0),
        Config::Processor(proc) => {
            let mut inner = Vec::new();
            inner.push(1u8);
            write_i32(&mut inner, proc.code.len() as i32);
            inner.extend_from_slice(proc.code.as_bytes());
            write_i32(&mut inner, proc.links.len() as i32);
            for link in &proc.links {
                write_utf(&mut inner, &link.name);
                write_i16(&mut inner, link.x as i16);
                write_i16(&mut inner, link.y as i16);
            }
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&inner)?;
            let compressed = encoder.finish()?;
            out.push(14);
            write_i32(out, compressed.len() as i32);
            out.extend_from_slice(&compressed);
        }
    }
    Ok(())
}

fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_utf(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Registry names and footprints for the supported block set.
const CONTENT_TABLE: &[(&str, i32)] = &[
    // logic
    ("message", 1),
    ("switch", 1),
    ("micro-processor", 1),
    ("logic-processor", 2),
    ("hyper-processor", 3),
    ("memory-cell", 1),
    ("memory-bank", 2),
    ("logic-display", 3),
    ("large-logic-display", 6),
    ("canvas", 2),
    ("world-processor", 1),
    ("world-cell", 1),
    ("world-message", 1),
    // transport
    ("conveyor", 1),
    ("titanium-conveyor", 1),
    ("plastanium-conveyor", 1),
    ("armored-conveyor", 1),
    ("junction", 1),
    ("bridge-conveyor", 1),
    ("phase-conveyor", 1),
    ("sorter", 1),
    ("inverted-sorter", 1),
    ("router", 1),
    ("distributor", 2),
    ("overflow-gate", 1),
    ("underflow-gate", 1),
    ("mass-driver", 3),
    ("duct", 1),
    ("duct-router", 1),
    ("duct-bridge", 1),
    ("payload-conveyor", 3),
    ("payload-router", 3),
    // drills
    ("mechanical-drill", 2),
    ("pneumatic-drill", 2),
    ("laser-drill", 3),
    ("blast-drill", 4),
    ("water-extractor", 2),
    ("cultivator", 2),
    ("oil-extractor", 3),
    // production
    ("graphite-press", 2),
    ("multi-press", 3),
    ("silicon-smelter", 2),
    ("silicon-crucible", 3),
    ("kiln", 2),
    ("plastanium-compressor", 2),
    ("phase-weaver", 2),
    ("surge-smelter", 3),
    ("cryofluid-mixer", 2),
    ("pyratite-mixer", 2),
    ("blast-mixer", 2),
    ("melter", 1),
    ("separator", 2),
    ("disassembler", 3),
    ("spore-press", 2),
    ("pulverizer", 1),
    ("coal-centrifuge", 2),
    ("incinerator", 1),
    // walls
    ("copper-wall", 1),
    ("copper-wall-large", 2),
    ("titanium-wall", 1),
    ("titanium-wall-large", 2),
    ("plastanium-wall", 1),
    ("plastanium-wall-large", 2),
    ("thorium-wall", 1),
    ("thorium-wall-large", 2),
    ("phase-wall", 1),
    ("phase-wall-large", 2),
    ("surge-wall", 1),
    ("surge-wall-large", 2),
    ("door", 1),
    ("door-large", 2),
    ("scrap-wall", 1),
    ("scrap-wall-large", 2),
    ("scrap-wall-huge", 3),
    ("scrap-wall-gigantic", 4),
    // effect
    ("mender", 1),
    ("mend-projector", 2),
    ("overdrive-projector", 2),
    ("overdrive-dome", 3),
    ("force-projector", 3),
    ("shock-mine", 1),
    ("illuminator", 1),
    // liquids
    ("mechanical-pump", 1),
    ("rotary-pump", 2),
    ("impulse-pump", 3),
    ("conduit", 1),
    ("pulse-conduit", 1),
    ("plated-conduit", 1),
    ("liquid-router", 1),
    ("liquid-container", 2),
    ("liquid-tank", 3),
    ("liquid-junction", 1),
    ("bridge-conduit", 1),
    ("phase-conduit", 1),
    // power
    ("power-node", 1),
    ("power-node-large", 2),
    ("surge-tower", 2),
    ("diode", 1),
    ("battery", 1),
    ("battery-large", 3),
    ("combustion-generator", 1),
    ("thermal-generator", 2),
    ("steam-generator", 2),
    ("differential-generator", 3),
    ("rtg-generator", 2),
    ("solar-panel", 1),
    ("solar-panel-large", 3),
    ("thorium-reactor", 3),
    ("impact-reactor", 4),
    // storage
    ("core-shard", 3),
    ("core-foundation", 4),
    ("core-nucleus", 5),
    ("vault", 3),
    ("container", 2),
    ("unloader", 1),
    // turrets
    ("duo", 1),
    ("scatter", 2),
    ("scorch", 1),
    ("hail", 1),
    ("wave", 2),
    ("lancer", 2),
    ("arc", 1),
    ("parallax", 2),
    ("swarmer", 2),
    ("salvo", 2),
    ("segment", 2),
    ("tsunami", 3),
    ("fuse", 3),
    ("ripple", 3),
    ("cyclone", 3),
    ("foreshadow", 4),
    ("spectre", 4),
    ("meltdown", 4),
    // units
    ("ground-factory", 3),
    ("air-factory", 3),
    ("naval-factory", 3),
    ("additive-reconstructor", 3),
    ("multiplicative-reconstructor", 5),
    ("exponential-reconstructor", 7),
    ("tetrative-reconstructor", 9),
    ("repair-point", 1),
    ("repair-turret", 2),
    // campaign & sandbox
    ("launch-pad", 3),
    ("interplanetary-accelerator", 7),
    ("power-source", 1),
    ("power-void", 1),
    ("item-source", 1),
    ("item-void", 1),
    ("liquid-source", 1),
    ("liquid-void", 1),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn micro() -> Content {
        Content::from_name("micro-processor").unwrap()
    }

    #[test]
    fn content_lookup_knows_sizes() {
        assert_eq!(Content::from_name("message").unwrap().size, 1);
        assert_eq!(Content::from_name("logic-processor").unwrap().size, 2);
        assert_eq!(Content::from_name("logic-display").unwrap().size, 3);
        assert!(Content::from_name("not-a-block").is_none());
    }

    #[test]
    fn processors_are_flagged() {
        assert!(micro().is_processor());
        assert!(!Content::from_name("switch").unwrap().is_processor());
    }

    #[test]
    fn add_block_rejects_overlap() {
        let mut schem = Schematic::new();
        assert!(schem.add_block(micro(), 0, 0, Config::None, 0).is_some());
        assert!(schem.add_block(micro(), 0, 0, Config::None, 0).is_none());
        assert!(schem.add_block(micro(), 1, 0, Config::None, 0).is_some());
    }

    #[test]
    fn large_blocks_cover_their_footprint() {
        let mut schem = Schematic::new();
        let display = Content::from_name("logic-display").unwrap();
        schem.add_block(display, 5, 5, Config::None, 0).unwrap();
        assert!(schem.is_filled(4, 4));
        assert!(schem.is_filled(6, 6));
        assert!(!schem.is_filled(7, 5));
        assert!(schem.add_block(micro(), 6, 6, Config::None, 0).is_none());
    }

    #[test]
    fn serialized_form_starts_with_magic_and_version() {
        let mut schem = Schematic::new();
        schem.set_tag("name", "test");
        schem.add_block(micro(), 0, 0, Config::None, 0);
        let bytes = schem.serialize().unwrap();
        assert_eq!(&bytes[0..4], b"msch");
        assert_eq!(bytes[4], 1);
    }

    #[test]
    fn payload_records_extent_and_tags() {
        let mut schem = Schematic::new();
        schem.set_tag("name", "t");
        let display = Content::from_name("logic-display").unwrap();
        schem.add_block(display, 1, 1, Config::None, 0);
        let bytes = schem.serialize().unwrap();
        let mut decoder = flate2::read::ZlibDecoder::new(&bytes[5..]);
        let mut payload = Vec::new();
        decoder.read_to_end(&mut payload).unwrap();
        let width = i16::from_be_bytes([payload[0], payload[1]]);
        let height = i16::from_be_bytes([payload[2], payload[3]]);
        assert_eq!((width, height), (3, 3));
        assert_eq!(payload[4], 1, "one tag");
    }

    #[test]
    fn base64_form_is_ascii() {
        let mut schem = Schematic::new();
        schem.add_block(micro(), 0, 0, Config::None, 0);
        let text = schem.to_base64().unwrap();
        assert!(text.is_ascii());
        assert!(!text.is_empty());
    }

    #[test]
    fn empty_schematic_serializes() {
        let schem = Schematic::new();
        let bytes = schem.serialize().unwrap();
        assert_eq!(&bytes[0..4], b"msch");
    }

    #[test]
    fn processor_codes_are_exposed() {
        let mut schem = Schematic::new();
        let config = Config::Processor(ProcessorConfig {
            code: "set x 1\n".to_string(),
            links: vec![],
        });
        schem.add_block(micro(), 0, 0, config, 0);
        assert_eq!(schem.processor_codes(), vec!["set x 1\n"]);
    }
}
