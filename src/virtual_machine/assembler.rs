//! Assembly language parser and bytecode compiler.
//!
//! Converts human-readable assembly source into a [`Script`].
//! Uses [`for_each_instruction!`](crate::for_each_instruction) to generate
//! the assembler IR, its encoder and `parse_instruction`.
//!
//! # Syntax
//!
//! ```text
//! [pub] label:                         # optional label definition
//! MNEMONIC operand1, operand2, ...     # optional comment
//! ```
//!
//! - Mnemonics are case-insensitive (`ADD`, `add`)
//! - Registers use `r` prefix (e.g., `r0`, `r31`)
//! - Numbers are decimal integers of any length (e.g., `42`, `-1`)
//! - Strings are double-quoted, with `\"`, `\\`, `\n` and `\t` escapes
//! - Other literals: `true`, `false`, `none`, `0xCAFE` bytes, `ts:N`
//!   timestamps, `enum:N` enums
//! - Jump and call targets are label names or absolute offsets
//! - Comments start with `#`
//! - Commas between operands are optional
//!
//! Labels marked `pub` become the script's public methods. When a script
//! declares any, a selector dispatcher is placed at offset 0: it pops a
//! method name from the evaluation stack, jumps to the matching label and
//! returns when nothing matches. Registers r29 to r31 are its scratch space.

use crate::for_each_instruction;
use crate::types::encoding::Encode;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{Literal, Target, ValueType};
use crate::virtual_machine::script::{DebugInfo, Script};
use crate::virtual_machine::value::parse_decimal;
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = '#';
const LABEL_SUFFIX: char = ':';
const PUB_KEYWORD: &str = "pub";
const SELECTOR_REG: &str = "r31";
const NAME_REG: &str = "r30";
const MATCH_REG: &str = "r29";

/// Registers a script with public methods needs: its dispatcher uses r29-r31.
pub const DISPATCHER_REGISTERS: usize = 32;

/// Return the line/column/message triple for assembly-related errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, String)> {
    match err {
        VMError::AssemblyError {
            line,
            offset,
            source,
        } => Some((*line, *offset, source.clone())),
        VMError::ParseError {
            line,
            offset,
            message,
        } => Some((*line, *offset, message.clone())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for assembly failures.
pub fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    // Line 0 is generated code with no source text.
    if line == 0 {
        return diag;
    }
    if let Some(raw_line) = source.lines().nth(line - 1) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Emit a helpful diagnostic to stderr for assembly errors.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    if let Some((line, offset, message)) = assembly_error_location(err) {
        eprintln!(
            "{}",
            render_assembly_diagnostic(file, source, line, offset, &message)
        );
    } else {
        eprintln!("error: {err}");
    }
}

/// Label tracking during compilation.
pub struct AsmContext {
    /// Label definitions mapping names to bytecode offsets.
    pub(crate) labels: HashMap<String, usize>,
}

impl AsmContext {
    /// Creates an empty assembly context.
    pub fn new() -> Self {
        Self {
            labels: HashMap::new(),
        }
    }

    /// Registers a label at the given bytecode offset.
    pub(crate) fn define_label(&mut self, name: String, offset: usize) -> Result<(), VMError> {
        if self.labels.contains_key(&name) {
            return Err(VMError::DuplicateLabel { label: name });
        }
        self.labels.insert(name, offset);
        Ok(())
    }

    /// Resolves a label to its bytecode offset.
    pub(crate) fn resolve_label(&self, name: &str) -> Result<usize, VMError> {
        self.labels
            .get(name)
            .copied()
            .ok_or(VMError::UndefinedLabel {
                label: name.to_string(),
            })
    }

    /// All labels ordered by offset, then name.
    fn sorted_labels(&self) -> Vec<(String, u32)> {
        let mut labels: Vec<(String, u32)> = self
            .labels
            .iter()
            .map(|(name, offset)| (name.clone(), *offset as u32))
            .collect();
        labels.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        labels
    }
}

impl Default for AsmContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One line fed to the two passes. Generated lines carry number 0.
struct SourceLine {
    number: usize,
    text: String,
}

#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column offset in the line.
    offset: usize,
}

/// Tokenize a single line of assembly.
///
/// Rules:
/// - `#` starts a comment
/// - commas are ignored
/// - whitespace-separated tokens
/// - a quoted string is one token, backslash escapes the next byte
fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token<'_>>, VMError> {
    let mut out = Vec::with_capacity(8);

    let mut start: Option<usize> = None;
    let mut start_col: usize = 0;
    let mut in_str = false;

    let bytes = line.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        // comment start
        if b == COMMENT_CHAR as u8 && !in_str {
            break;
        }

        match b {
            b'\\' if in_str => {
                i += 2;
            }

            b'"' => {
                if start.is_none() {
                    start = Some(i);
                    start_col = i + 1;
                }
                in_str = !in_str;
                i += 1;
            }

            b',' | b' ' | b'\t' if !in_str => {
                if let Some(s) = start {
                    let text = line[s..i].trim();
                    if !text.is_empty() {
                        out.push(Token {
                            text,
                            offset: start_col,
                        });
                    }
                    start = None;
                }
                i += 1;
            }

            _ => {
                if start.is_none() {
                    start = Some(i);
                    start_col = i + 1;
                }
                i += 1;
            }
        }
    }

    if in_str {
        return Err(VMError::ParseError {
            line: line_no,
            offset: start_col,
            message: "unterminated string literal (missing closing quote)".to_string(),
        });
    }

    if let Some(s) = start {
        let text = line[s..].trim();
        if !text.is_empty() {
            out.push(Token {
                text,
                offset: start_col,
            });
        }
    }

    Ok(out)
}

fn invalid_literal(tok: &str, reason: &str) -> VMError {
    VMError::InvalidLiteralToken {
        token: tok.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a register token like `r0`, `r15`
pub(crate) fn parse_reg(tok: &str) -> Result<u8, VMError> {
    tok.strip_prefix('r')
        .ok_or_else(|| VMError::ExpectedRegister {
            token: tok.to_string(),
        })?
        .parse::<u8>()
        .map_err(|_| VMError::InvalidRegister {
            token: tok.to_string(),
        })
}

fn is_register_token(tok: &str) -> bool {
    tok.strip_prefix('r')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Resolves an escape-free body of a quoted token.
fn unescape(tok: &str, body: &str) -> Result<String, VMError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            _ => return Err(invalid_literal(tok, "unknown escape sequence")),
        }
    }
    Ok(out)
}

/// Parse a quoted string token, returning `None` when `tok` is not quoted.
fn parse_quoted(tok: &str) -> Option<Result<String, VMError>> {
    let body = tok.strip_prefix('"')?.strip_suffix('"')?;
    Some(unescape(tok, body))
}

fn parse_hex(tok: &str, digits: &str) -> Result<Vec<u8>, VMError> {
    if digits.len() % 2 != 0 {
        return Err(invalid_literal(tok, "odd number of hex digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| invalid_literal(tok, "invalid hex digit"))
        })
        .collect()
}

fn parse_u32_suffix(tok: &str, digits: &str) -> Result<u32, VMError> {
    digits
        .parse::<u32>()
        .map_err(|_| invalid_literal(tok, "expected an unsigned 32-bit number"))
}

/// Parse a `LOAD` literal.
pub fn parse_literal(tok: &str) -> Result<Literal, VMError> {
    if let Some(text) = parse_quoted(tok) {
        return Ok(Literal::String(text?));
    }
    match tok {
        "none" => return Ok(Literal::None),
        "true" => return Ok(Literal::Bool(true)),
        "false" => return Ok(Literal::Bool(false)),
        _ => {}
    }
    if let Some(digits) = tok.strip_prefix("0x") {
        return parse_hex(tok, digits).map(Literal::Bytes);
    }
    if let Some(digits) = tok.strip_prefix("ts:") {
        return parse_u32_suffix(tok, digits).map(Literal::Timestamp);
    }
    if let Some(digits) = tok.strip_prefix("enum:") {
        return parse_u32_suffix(tok, digits).map(Literal::Enum);
    }
    parse_decimal(tok)
        .map(Literal::Number)
        .ok_or_else(|| invalid_literal(tok, "unrecognized literal"))
}

/// Parse a `CAST` type name such as `String` or `number`.
pub(crate) fn parse_type(tok: &str) -> Result<ValueType, VMError> {
    ValueType::from_name(tok).ok_or_else(|| invalid_literal(tok, "unknown value type"))
}

/// Parse an `EXTCALL` target: a register, a quoted name or a bare name.
pub(crate) fn parse_target(tok: &str) -> Result<Target, VMError> {
    if is_register_token(tok) {
        return parse_reg(tok).map(Target::Register);
    }
    match parse_quoted(tok) {
        Some(name) => Ok(Target::Name(name?)),
        None if tok.starts_with('"') => Err(invalid_literal(tok, "unterminated interop name")),
        None => Ok(Target::Name(tok.to_string())),
    }
}

/// Parses an absolute offset or a label reference.
///
/// During the sizing pass labels are not known yet and resolve to 0; the
/// operand is fixed-width so the size is unaffected.
pub(crate) fn parse_addr(tok: &str, ctx: &AsmContext, resolve: bool) -> Result<u32, VMError> {
    if let Ok(v) = tok.parse::<u32>() {
        return Ok(v);
    }
    if !is_label_name(tok) {
        return Err(invalid_literal(tok, "expected a label or offset"));
    }
    if !resolve {
        return Ok(0);
    }
    Ok(ctx.resolve_label(tok)? as u32)
}

/// Checks if a token is a label definition (ends with `:`)
fn is_label_def(tok: &str) -> bool {
    tok.ends_with(LABEL_SUFFIX) && tok.len() > 1
}

/// Extracts the label name from a label definition token.
fn label_name(tok: &str) -> &str {
    &tok[..tok.len() - 1]
}

/// Label names are identifiers: `[A-Za-z_.][A-Za-z0-9_.]*`.
fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn instruction_from_str(name: &str) -> Result<Instruction, VMError> {
    Instruction::ALL
        .iter()
        .copied()
        .find(|instr| instr.mnemonic().eq_ignore_ascii_case(name))
        .ok_or_else(|| VMError::InvalidInstructionName {
            name: name.to_string(),
        })
}

macro_rules! define_parse_instruction {
    // ---------- operand types ----------
    (@ty Reg) => { u8 };
    (@ty Addr) => { u32 };
    (@ty Literal) => { Literal };
    (@ty Type) => { ValueType };
    (@ty Target) => { Target };

    // ---------- encoding ----------
    (@emit $out:ident, Reg, $field:ident) => { $out.push(*$field) };
    (@emit $out:ident, Addr, $field:ident) => { $out.extend_from_slice(&$field.to_le_bytes()) };
    (@emit $out:ident, Literal, $field:ident) => { $field.encode($out) };
    (@emit $out:ident, Type, $field:ident) => { $out.push(*$field as u8) };
    (@emit $out:ident, Target, $field:ident) => { $field.encode($out) };

    // ---------- parsing ----------
    (@construct $ctx:ident $resolve:ident $operands:ident; $name:ident) => {
        Ok(AsmInstr::$name {})
    };

    (@construct $ctx:ident $resolve:ident $operands:ident; $name:ident $( $field:ident : $kind:ident ),+ ) => {{
        let mut it = $operands.iter();
        Ok(AsmInstr::$name {
            $(
                $field: {
                    let tok = it.next().ok_or(VMError::ArityMismatch {
                        mnemonic: Instruction::$name.mnemonic(),
                        expected: Instruction::$name.operand_count(),
                        actual: $operands.len(),
                    })?;
                    define_parse_instruction!(@parse_operand $kind, tok, $ctx, $resolve)?
                },
            )*
        })
    }};

    (@parse_operand Reg, $tok:expr, $ctx:expr, $resolve:expr) => {
        parse_reg($tok.text)
    };

    (@parse_operand Addr, $tok:expr, $ctx:expr, $resolve:expr) => {
        parse_addr($tok.text, $ctx, $resolve)
    };

    (@parse_operand Literal, $tok:expr, $ctx:expr, $resolve:expr) => {
        parse_literal($tok.text)
    };

    (@parse_operand Type, $tok:expr, $ctx:expr, $resolve:expr) => {
        parse_type($tok.text)
    };

    (@parse_operand Target, $tok:expr, $ctx:expr, $resolve:expr) => {
        parse_target($tok.text)
    };

    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {

        // =========================
        // Assembler IR
        // =========================
        #[derive(Debug, Clone)]
        enum AsmInstr {
            $(
                $name {
                    $( $field: define_parse_instruction!(@ty $kind) ),*
                },
            )*
        }

        impl AsmInstr {
            /// Encodes the assembly instruction into bytecode
            fn assemble(&self, out: &mut Vec<u8>) {
                match self {
                    $(
                        AsmInstr::$name { $( $field ),* } => {
                            out.push($opcode);
                            $(
                                define_parse_instruction!(@emit out, $kind, $field);
                            )*
                        }
                    ),*
                }
            }
        }

        /// Parse one instruction from tokens into [`AsmInstr`].
        ///
        /// With `resolve` unset, label operands are only checked for shape.
        fn parse_instruction(
            ctx: &AsmContext,
            tokens: &[Token],
            resolve: bool,
        ) -> Result<AsmInstr, VMError> {
            let Some(head) = tokens.first() else {
                return Err(VMError::ArityMismatch {
                    mnemonic: "<missing opcode>",
                    expected: 1,
                    actual: 0,
                });
            };

            let instr = instruction_from_str(head.text)?;
            let operands = &tokens[1..];
            if operands.len() != instr.operand_count() {
                return Err(VMError::ArityMismatch {
                    mnemonic: instr.mnemonic(),
                    expected: instr.operand_count(),
                    actual: operands.len(),
                });
            }

            match instr {
                $(
                    Instruction::$name => {
                        define_parse_instruction!(
                            @construct ctx resolve operands; $name $( $field : $kind ),*
                        )
                    }
                ),*
            }
        }
    };
}

for_each_instruction!(define_parse_instruction);

impl AsmInstr {
    fn encoded_len(&self) -> usize {
        let mut out = Vec::new();
        self.assemble(&mut out);
        out.len()
    }
}

/// Wraps an error with the line and column it came from.
fn located(line: usize, offset: usize) -> impl FnOnce(VMError) -> VMError {
    move |err| match err {
        VMError::ParseError { .. } | VMError::AssemblyError { .. } => err,
        other => VMError::AssemblyError {
            line,
            offset,
            source: other.to_string(),
        },
    }
}

/// Splits a tokenized line into an optional `(name, is_pub, token)` label
/// definition and the instruction tokens that follow it.
fn split_label<'t, 'a>(tokens: &'t [Token<'a>]) -> (Option<(&'a str, bool, usize)>, &'t [Token<'a>]) {
    let is_pub = tokens.len() > 1 && tokens[0].text == PUB_KEYWORD && is_label_def(tokens[1].text);
    let label_idx = usize::from(is_pub);
    match tokens.get(label_idx) {
        Some(tok) if is_label_def(tok.text) => (
            Some((label_name(tok.text), is_pub, tok.offset)),
            &tokens[label_idx + 1..],
        ),
        _ => (None, tokens),
    }
}

/// Prepends the selector dispatcher for public labels.
///
/// Scans the source for labels prefixed with `pub` and, when any exist,
/// generates a comparison chain that pops the selector and jumps to the
/// label of the same name. An unknown selector falls through to `RET`.
fn assemble_source_step_1(source: &str) -> Result<Vec<SourceLine>, VMError> {
    let mut public_labels: Vec<String> = Vec::new();

    for (line_no, line) in source.lines().enumerate() {
        let tokens = tokenize(line_no + 1, line)?;
        if let (Some((name, true, _)), _) = split_label(&tokens) {
            public_labels.push(name.to_string());
        }
    }

    let mut lines = Vec::new();
    if !public_labels.is_empty() {
        let mut dispatcher = vec![format!("POP {SELECTOR_REG}")];
        for name in &public_labels {
            dispatcher.push(format!("LOAD {NAME_REG}, \"{name}\""));
            dispatcher.push(format!("EQUAL {SELECTOR_REG}, {NAME_REG}, {MATCH_REG}"));
            dispatcher.push(format!("JMPIF {MATCH_REG}, {name}"));
        }
        dispatcher.push("RET".to_string());
        lines.extend(dispatcher.into_iter().map(|text| SourceLine { number: 0, text }));
    }

    lines.extend(source.lines().enumerate().map(|(i, text)| SourceLine {
        number: i + 1,
        text: text.to_string(),
    }));
    Ok(lines)
}

/// Performs two-pass assembly on preprocessed source.
///
/// Pass 1: Tokenizes all lines, checks every instruction, computes instruction
/// sizes and records label offsets.
///
/// Pass 2: Parses instructions with label resolution and emits bytecode along
/// with the offset to line table.
fn assemble_source_step_2(lines: &[SourceLine]) -> Result<Script, VMError> {
    let mut asm_context = AsmContext::new();
    let mut methods: Vec<(String, u32)> = Vec::new();

    // First pass
    let mut parsed_lines: Vec<(usize, Vec<Token>)> = Vec::new();
    let mut code_size = 0usize;

    for line in lines {
        let tokens = tokenize(line.number, &line.text)?;
        if tokens.is_empty() {
            continue;
        }

        let (label, instr_tokens) = split_label(&tokens);
        if let Some((name, is_pub, tok_offset)) = label {
            if !is_label_name(name) {
                return Err(VMError::ParseError {
                    line: line.number,
                    offset: tok_offset,
                    message: format!("invalid label name {name:?}"),
                });
            }
            asm_context
                .define_label(name.to_string(), code_size)
                .map_err(located(line.number, tok_offset))?;
            if is_pub {
                methods.push((name.to_string(), code_size as u32));
            }
        }

        if let Some(head) = instr_tokens.first() {
            let instr = parse_instruction(&asm_context, instr_tokens, false)
                .map_err(located(line.number, head.offset))?;
            code_size += instr.encoded_len();
            if u32::try_from(code_size).is_err() {
                return Err(VMError::AssemblyError {
                    line: line.number,
                    offset: head.offset,
                    source: "script exceeds the 4 GiB address space".to_string(),
                });
            }
            parsed_lines.push((line.number, instr_tokens.to_vec()));
        }
    }

    // Second pass
    let mut code = Vec::with_capacity(code_size);
    let mut debug_lines = Vec::new();

    for (line_no, tokens) in &parsed_lines {
        let start = code.len() as u32;
        let offset = tokens.first().map(|t| t.offset).unwrap_or(1);
        let instr =
            parse_instruction(&asm_context, tokens, true).map_err(located(*line_no, offset))?;
        instr.assemble(&mut code);
        if *line_no > 0 {
            debug_lines.push((start, *line_no as u32));
        }
    }

    Ok(Script {
        code: code.into(),
        methods,
        debug: Some(DebugInfo {
            labels: asm_context.sorted_labels(),
            lines: debug_lines,
        }),
    })
}

/// Assemble a full source string into a [`Script`].
///
/// Uses two-pass assembly:
/// 1. First pass: tokenize lines, validate instructions, record label positions
/// 2. Second pass: parse instructions with label resolution, emit bytecode
///
/// The returned script always carries [`DebugInfo`].
pub fn assemble_source(source: impl Into<String>) -> Result<Script, VMError> {
    assemble_source_with_name(source.into(), "<source>")
}

/// Assembles source with an associated filename for error diagnostics.
///
/// Logs a compiler-style diagnostic to stderr on failure.
pub fn assemble_source_with_name(source: String, source_name: &str) -> Result<Script, VMError> {
    let result = assemble_source_step_1(&source).and_then(|lines| assemble_source_step_2(&lines));

    if let Err(err) = &result {
        log_assembly_error(source_name, &source, err);
    }

    result
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Script, VMError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| VMError::IoError {
        message: format!("{}: {e}", path_ref.display()),
    })?;
    assemble_source_with_name(source, &path_ref.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn tok(text: &str) -> Token<'_> {
        Token { text, offset: 1 }
    }

    #[test]
    fn parse_reg_valid() {
        assert_eq!(parse_reg("r0").unwrap(), 0);
        assert_eq!(parse_reg("r255").unwrap(), 255);
        assert_eq!(parse_reg("r42").unwrap(), 42);
    }

    #[test]
    fn parse_reg_missing_prefix() {
        assert!(matches!(parse_reg("0"), Err(VMError::ExpectedRegister { .. })));
        assert!(matches!(parse_reg("x0"), Err(VMError::ExpectedRegister { .. })));
    }

    #[test]
    fn parse_reg_invalid_number() {
        for bad in ["r", "r256", "r-1", "rAbc"] {
            assert!(
                matches!(parse_reg(bad), Err(VMError::InvalidRegister { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn tokenize_strings_and_comments() {
        let tokens = tokenize(1, r#"LOAD r0, "a, b # c" # trailing"#).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["LOAD", "r0", r#""a, b # c""#]);
        assert_eq!(tokens[2].offset, 10);

        let tokens = tokenize(1, r#"LOAD r0, "say \"hi\"""#).unwrap();
        assert_eq!(tokens[2].text, r#""say \"hi\"""#);
    }

    #[test]
    fn tokenize_unterminated_string() {
        assert!(matches!(
            tokenize(3, r#"LOAD r0, "open"#),
            Err(VMError::ParseError { line: 3, offset: 10, .. })
        ));
    }

    #[test]
    fn literal_forms() {
        assert_eq!(parse_literal("none").unwrap(), Literal::None);
        assert_eq!(parse_literal("true").unwrap(), Literal::Bool(true));
        assert_eq!(parse_literal("false").unwrap(), Literal::Bool(false));
        assert_eq!(
            parse_literal("-42").unwrap(),
            Literal::Number(BigInt::from(-42))
        );
        let big = "123456789012345678901234567890123456789012345678901234567890";
        assert_eq!(
            parse_literal(big).unwrap(),
            Literal::Number(big.parse::<BigInt>().unwrap())
        );
        assert_eq!(
            parse_literal(r#""line\n\"q\"\\""#).unwrap(),
            Literal::String("line\n\"q\"\\".into())
        );
        assert_eq!(
            parse_literal("0xCAfe").unwrap(),
            Literal::Bytes(vec![0xCA, 0xFE])
        );
        assert_eq!(parse_literal("0x").unwrap(), Literal::Bytes(vec![]));
        assert_eq!(parse_literal("ts:1700000000").unwrap(), Literal::Timestamp(1_700_000_000));
        assert_eq!(parse_literal("enum:3").unwrap(), Literal::Enum(3));
    }

    #[test]
    fn literal_errors() {
        for bad in ["0xABC", "0xZZ", "ts:-1", "enum:4294967296", "12a", "TRUE", r#""\q""#] {
            assert!(
                matches!(parse_literal(bad), Err(VMError::InvalidLiteralToken { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn target_forms() {
        assert_eq!(parse_target("r4").unwrap(), Target::Register(4));
        assert_eq!(
            parse_target("Runtime.Log").unwrap(),
            Target::Name("Runtime.Log".into())
        );
        assert_eq!(
            parse_target(r#""Runtime.Log""#).unwrap(),
            Target::Name("Runtime.Log".into())
        );
        assert_eq!(parse_target("r2d2").unwrap(), Target::Name("r2d2".into()));
    }

    #[test]
    fn type_names() {
        assert_eq!(parse_type("String").unwrap(), ValueType::String);
        assert_eq!(parse_type("number").unwrap(), ValueType::Number);
        assert!(parse_type("List").is_err());
    }

    #[test]
    fn assemble_empty_source() {
        let script = assemble_source("").unwrap();
        assert!(script.code.is_empty());
        assert!(script.methods.is_empty());
    }

    #[test]
    fn assemble_comments_and_blank_lines() {
        let source = format!(
            r#"
            {COMMENT_CHAR} this is a comment

            {COMMENT_CHAR} another comment
        "#
        );
        let script = assemble_source(source).unwrap();
        assert!(script.code.is_empty());
    }

    #[test]
    fn assemble_single_instruction() {
        let script = assemble_source("add r1, r2, r3").unwrap();
        assert_eq!(
            script.code.as_slice(),
            &[Instruction::Add as u8, 1, 2, 3]
        );
    }

    #[test]
    fn assemble_load_literal_layout() {
        let script = assemble_source("LOAD r0, 5").unwrap();
        let mut expected = vec![Instruction::Load as u8, 0];
        Literal::Number(BigInt::from(5)).encode(&mut expected);
        assert_eq!(script.code.as_slice(), expected.as_slice());
    }

    #[test]
    fn assemble_cast_and_extcall() {
        let script = assemble_source("CAST r0, r1, String\nEXTCALL r2").unwrap();
        assert_eq!(
            script.code.as_slice(),
            &[
                Instruction::Cast as u8,
                0,
                1,
                ValueType::String as u8,
                Instruction::ExtCall as u8,
                Target::REGISTER_TAG,
                2
            ]
        );
    }

    #[test]
    fn assemble_invalid_instruction() {
        let err = assemble_source("INVALID r0").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 1, offset: 1, ref source } if source.contains("invalid instruction name")
        ));
    }

    #[test]
    fn assemble_wrong_arity() {
        let err = assemble_source("  ADD r0, r1").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 1, offset: 3, ref source } if source.contains("expects 3 operands, got 2")
        ));
    }

    #[test]
    fn labels_resolve_forward_and_backward() {
        let source = r#"
            start:
                JMP end
            middle: NOP
            end:
                JMP start
        "#;
        let script = assemble_source(source).unwrap();
        // JMP(5) NOP(1) JMP(5)
        assert_eq!(script.code.len(), 11);
        assert_eq!(&script.code[1..5], &6u32.to_le_bytes());
        assert_eq!(&script.code[7..11], &0u32.to_le_bytes());

        let debug = script.debug.unwrap();
        assert_eq!(
            debug.labels,
            vec![
                ("start".to_string(), 0),
                ("middle".to_string(), 5),
                ("end".to_string(), 6)
            ]
        );
        assert_eq!(debug.lines, vec![(0, 3), (5, 4), (6, 6)]);
    }

    #[test]
    fn numeric_addresses_pass_through() {
        let script = assemble_source("JMP 0").unwrap();
        assert_eq!(&script.code[1..5], &0u32.to_le_bytes());
    }

    #[test]
    fn duplicate_and_undefined_labels() {
        let err = assemble_source("a:\na:").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 2, ref source, .. } if source.contains("duplicate label")
        ));

        let err = assemble_source("JMP nowhere").unwrap_err();
        assert!(matches!(
            err,
            VMError::AssemblyError { line: 1, ref source, .. } if source.contains("undefined label")
        ));

        let err = assemble_source("9lives:").unwrap_err();
        assert!(matches!(err, VMError::ParseError { line: 1, .. }));
    }

    #[test]
    fn public_labels_get_a_dispatcher() {
        let source = r#"
            pub transfer:
                RET
            helper:
                RET
            pub mint: RET
        "#;
        let script = assemble_source(source).unwrap();
        let names: Vec<&str> = script.methods.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["transfer", "mint"]);

        // POP, then LOAD/EQUAL/JMPIF per method, then RET
        assert_eq!(script.code[0], Instruction::Pop as u8);
        assert_eq!(script.code[1], 31);

        let transfer = script.method_offset("transfer").unwrap() as usize;
        let mint = script.method_offset("mint").unwrap() as usize;
        assert_eq!(script.code[transfer], Instruction::Ret as u8);
        assert_eq!(mint, transfer + 2);
        assert_eq!(script.code[transfer - 1], Instruction::Ret as u8);

        // Generated code has no source lines; the first user line is line 3.
        let debug = script.debug.unwrap();
        assert_eq!(debug.lines.first(), Some(&(transfer as u32, 3)));
        assert_eq!(debug.line_for(0), None);
    }

    #[test]
    fn instruction_parse_empty() {
        assert!(matches!(
            parse_instruction(&AsmContext::new(), &[], true),
            Err(VMError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn instruction_parse_range() {
        let tokens = vec![tok("range"), tok("r1"), tok("r2"), tok("r3"), tok("r4")];
        match parse_instruction(&AsmContext::new(), &tokens, true).unwrap() {
            AsmInstr::Range {
                src,
                dst,
                index,
                length,
            } => {
                assert_eq!((src, dst, index, length), (1, 2, 3, 4));
            }
            other => panic!("wrong instruction type: {other:?}"),
        }
    }

    #[test]
    fn diagnostic_points_at_column() {
        let diag = render_assembly_diagnostic("x.asm", "NOP\n  BAD r0", 2, 3, "boom");
        assert!(diag.contains("error: boom"));
        assert!(diag.contains(" --> x.asm:2:3"));
        assert!(diag.contains("   2 |   BAD r0"));
        assert!(diag.contains("  |   ^"));

        let generated = render_assembly_diagnostic("x.asm", "NOP", 0, 1, "boom");
        assert!(!generated.contains('|'));
    }

    #[test]
    fn assemble_file_reports_missing_file() {
        assert!(matches!(
            assemble_file("/definitely/not/here.asm"),
            Err(VMError::IoError { .. })
        ));
    }
}
