//! Compact solc source maps (`s:l:f:j;...`) resolved to bytecode offsets.

use rustc_hash::FxHashMap;

use crate::error::StackTraceError;
use crate::opcodes;

/// Source range of one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionMapping {
    pub start: usize,
    pub length: usize,
    /// `-1` for compiler-generated code with no source file.
    pub file_index: i64,
    pub jump: String,
    pub line: usize,
    pub column: usize,
}

impl InstructionMapping {
    pub fn is_internal(&self) -> bool {
        self.file_index == -1
    }

    /// The mapped source text, empty when the range falls outside `source`.
    pub fn snippet<'a>(&self, source: &'a str) -> &'a str {
        source
            .get(self.start..self.start.saturating_add(self.length))
            .unwrap_or_default()
    }
}

/// Instruction mappings keyed by bytecode offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    offsets: FxHashMap<usize, InstructionMapping>,
}

impl SourceMap {
    pub fn get(&self, pc: usize) -> Option<&InstructionMapping> {
        self.offsets.get(&pc)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

fn field(value: &str) -> Result<i64, StackTraceError> {
    value
        .parse()
        .map_err(|e| StackTraceError::InvalidSourceMap(format!("{value}: {e}")))
}

fn position(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

/// Parse `source_map` into per-instruction mappings. An empty entry repeats the
/// previous one and an empty field keeps the previous value.
pub fn parse_instructions(source_map: &str) -> Result<Vec<Option<InstructionMapping>>, StackTraceError> {
    let mut instructions: Vec<Option<InstructionMapping>> = Vec::new();
    let (mut start, mut length, mut file_index) = (0i64, 0i64, 0i64);
    let mut jump = String::new();

    for entry in source_map.split(';') {
        if entry.is_empty() {
            let previous = instructions.last().cloned().flatten();
            instructions.push(previous);
            continue;
        }

        let fields: Vec<&str> = entry.split(':').collect();
        if let Some(value) = fields.first().filter(|v| !v.is_empty()) {
            start = field(value)?;
        }
        if let Some(value) = fields.get(1).filter(|v| !v.is_empty()) {
            length = field(value)?;
        }
        if let Some(value) = fields.get(2).filter(|v| !v.is_empty()) {
            file_index = field(value)?;
        }
        if let Some(value) = fields.get(3).filter(|v| !v.is_empty()) {
            jump = (*value).to_string();
        }

        instructions.push(Some(InstructionMapping {
            start: position(start),
            length: position(length),
            file_index,
            jump: jump.clone(),
            line: 0,
            column: 0,
        }));
    }
    Ok(instructions)
}

/// Line (1-based) and column of byte `start` in `source`.
fn line_column(source: &str, start: usize) -> (usize, usize) {
    let (mut line, mut column) = (1, 1);
    for byte in source.bytes().take(start) {
        if byte == b'\n' {
            line += 1;
            column = 0;
        }
        column += 1;
    }
    (line, column)
}

/// Build the offset-keyed map for `bytecode`. PUSH immediates do not count as
/// instructions.
pub fn parse(source_map: &str, source: &str, bytecode: &[u8]) -> Result<SourceMap, StackTraceError> {
    let mut instructions = parse_instructions(source_map)?;
    for mapping in instructions.iter_mut().flatten() {
        (mapping.line, mapping.column) = line_column(source, mapping.start);
    }

    let mut offsets = FxHashMap::default();
    let mut instruction = 0;
    let mut pc = 0;
    while pc < bytecode.len() {
        if let Some(Some(mapping)) = instructions.get(instruction) {
            offsets.insert(pc, mapping.clone());
        }
        instruction += 1;
        pc += 1 + opcodes::immediate_size(bytecode[pc]);
    }

    Ok(SourceMap { offsets })
}
