//! x86_64 instructions in AT&T syntax.
//!
//! A mnemonic is matched against every legacy-encoded form iced-x86 knows
//! for it, and the shortest encoding that accepts the operands is kept.
//! Symbol references are encoded as zero and handed back as fixups.

use hashbrown::HashMap;
use iced_x86::{
    Code, ConstantOffsets, Encoder, EncodingKind, Instruction, MemoryOperand, Mnemonic, OpCodeInfo, OpCodeOperandKind,
    OpKind, Register,
};
use log::trace;
use object::elf;

use super::expr::{SymbolEnv, Value, parse_expr};
use super::lexer::{Token, TokenCursor, TokenKind};
use super::parser::{AsmError, is_temporary};
use crate::diagnostic::SourceLoc;

/// Stands in for a symbolic field so that a 32-bit form is chosen
const PLACEHOLDER: i64 = 0x1000_0000;

/// `sym@NAME` relocation specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Plt,
    GotPcRel,
    GotTpOff,
    TpOff,
}

impl Modifier {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "PLT" => Some(Modifier::Plt),
            "GOTPCREL" => Some(Modifier::GotPcRel),
            "GOTTPOFF" => Some(Modifier::GotTpOff),
            "TPOFF" => Some(Modifier::TpOff),
            _ => None,
        }
    }
}

/// `segment:disp(base, index, scale)`
#[derive(Debug, Clone)]
struct Memory {
    segment: Register,
    disp: Value,
    base: Register,
    index: Register,
    scale: u32,
}

impl Memory {
    fn is_bare(&self) -> bool {
        self.segment == Register::None && self.base == Register::None && self.index == Register::None
    }
}

#[derive(Debug, Clone)]
enum OperandKind {
    Reg(Register),
    Imm(Value),
    Mem(Memory),
}

#[derive(Debug, Clone)]
struct Operand {
    kind: OperandKind,
    modifier: Option<Modifier>,
    /// Written with a leading `*`
    indirect: bool,
}

/// Operand in the shape iced builds instructions from
#[derive(Debug, Clone, Copy)]
enum Arg {
    Reg(Register),
    Imm(i64),
    Mem(MemoryOperand),
    /// rel32 displacement to a label or symbol
    Branch,
}

/// How an AT&T name constrains operand sizes
#[derive(Debug, Clone, Copy)]
enum SizeRule {
    Any,
    /// `b`, `w`, `l` or `q` suffix, in bytes
    Uniform(usize),
    /// `movzbl` and friends
    Extend { src: usize, dst: usize },
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    mnemonic: Mnemonic,
    sizes: SizeRule,
    /// `movabs` only has the 64-bit immediate form
    imm64: bool,
}

impl Reading {
    fn plain(mnemonic: Mnemonic) -> Self {
        Reading {
            mnemonic,
            sizes: SizeRule::Any,
            imm64: false,
        }
    }
}

/// Relocation to apply to an encoded instruction
#[derive(Debug, Clone)]
pub(crate) struct Fixup {
    /// Offset of the field from the start of the instruction
    pub offset: usize,
    pub r_type: u32,
    pub value: Value,
    /// Added on top of the value's own addend
    pub addend: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct EncodedInstruction {
    pub bytes: Vec<u8>,
    pub fixups: Vec<Fixup>,
}

struct Candidate {
    instr: Instruction,
    bytes: Vec<u8>,
    offsets: ConstantOffsets,
    memory_size: usize,
    default64: bool,
}

fn suffix_size(c: u8) -> Option<usize> {
    match c {
        b'b' => Some(1),
        b'w' => Some(2),
        b'l' => Some(4),
        b'q' => Some(8),
        _ => None,
    }
}

fn is_punct(token: &Token, punct: &str) -> bool {
    matches!(token.kind, TokenKind::Punct(p) if p == punct)
}

fn is_rel32(op_code: &OpCodeInfo) -> bool {
    op_code.op_count() == 1 && op_code.op_kind(0) == OpCodeOperandKind::br64_4
}

/// Operands separated by commas outside parentheses
fn split_operands(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Punct("(") => depth += 1,
            TokenKind::Punct(")") => depth = depth.saturating_sub(1),
            TokenKind::Punct(",") if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

fn immediate_fits(kind: OpKind, value: i64) -> bool {
    let signed = |bits: u32| value >= -(1i64 << (bits - 1)) && value < 1i64 << (bits - 1);
    let either = |bits: u32| value >= -(1i64 << (bits - 1)) && value < 1i64 << bits;
    match kind {
        OpKind::Immediate8 | OpKind::Immediate8_2nd => either(8),
        OpKind::Immediate16 => either(16),
        OpKind::Immediate32 => either(32),
        OpKind::Immediate8to16 | OpKind::Immediate8to32 | OpKind::Immediate8to64 => signed(8),
        OpKind::Immediate32to64 => signed(32),
        OpKind::Immediate64 => true,
        _ => false,
    }
}

fn sizes_match(rule: SizeRule, instr: &Instruction, op_code: &OpCodeInfo) -> bool {
    match rule {
        SizeRule::Any => true,
        SizeRule::Uniform(size) => {
            let operand_size = op_code.operand_size() as usize;
            (operand_size == 0 || operand_size == size * 8)
                && (0..instr.op_count()).all(|i| match instr.op_kind(i) {
                    OpKind::Register => {
                        let register = instr.op_register(i);
                        // shift counts and port numbers keep their own size
                        !register.is_gpr()
                            || matches!(op_code.op_kind(i), OpCodeOperandKind::cl | OpCodeOperandKind::dx)
                            || register.size() == size
                    }
                    OpKind::Memory => {
                        let memory = instr.memory_size().size();
                        memory == 0 || memory == size
                    }
                    _ => true,
                })
        }
        SizeRule::Extend { src, dst } => {
            instr.op_count() == 2
                && instr.op_kind(0) == OpKind::Register
                && instr.op_register(0).size() == dst
                && match instr.op_kind(1) {
                    OpKind::Register => instr.op_register(1).size() == src,
                    OpKind::Memory => instr.memory_size().size() == src,
                    _ => false,
                }
        }
    }
}

/// Instruction for `code` with Intel-ordered operands, when the form takes them
fn build(code: Code, args: &[Arg]) -> Option<Instruction> {
    let imm = |value: i64| -> Option<i32> {
        i32::try_from(value)
            .ok()
            .or_else(|| u32::try_from(value).ok().map(|v| v as i32))
    };
    let built = match *args {
        [] => Ok(Instruction::with(code)),
        [Arg::Branch] => Instruction::with_branch(code, 0),
        [Arg::Reg(a)] => Instruction::with1(code, a),
        [Arg::Mem(a)] => Instruction::with1(code, a),
        [Arg::Imm(a)] => Instruction::with1(code, imm(a)?),
        [Arg::Reg(a), Arg::Reg(b)] => Instruction::with2(code, a, b),
        [Arg::Reg(a), Arg::Imm(b)] => match imm(b) {
            Some(b) => Instruction::with2(code, a, b),
            None => Instruction::with2(code, a, b),
        },
        [Arg::Reg(a), Arg::Mem(b)] => Instruction::with2(code, a, b),
        [Arg::Mem(a), Arg::Reg(b)] => Instruction::with2(code, a, b),
        [Arg::Mem(a), Arg::Imm(b)] => Instruction::with2(code, a, imm(b)?),
        [Arg::Imm(a), Arg::Reg(b)] => Instruction::with2(code, imm(a)?, b),
        [Arg::Imm(a), Arg::Imm(b)] => Instruction::with2(code, imm(a)?, imm(b)?),
        [Arg::Reg(a), Arg::Reg(b), Arg::Reg(c)] => Instruction::with3(code, a, b, c),
        [Arg::Reg(a), Arg::Reg(b), Arg::Imm(c)] => Instruction::with3(code, a, b, imm(c)?),
        [Arg::Reg(a), Arg::Reg(b), Arg::Mem(c)] => Instruction::with3(code, a, b, c),
        [Arg::Reg(a), Arg::Mem(b), Arg::Reg(c)] => Instruction::with3(code, a, b, c),
        [Arg::Reg(a), Arg::Mem(b), Arg::Imm(c)] => Instruction::with3(code, a, b, imm(c)?),
        [Arg::Mem(a), Arg::Reg(b), Arg::Reg(c)] => Instruction::with3(code, a, b, c),
        [Arg::Mem(a), Arg::Reg(b), Arg::Imm(c)] => Instruction::with3(code, a, b, imm(c)?),
        _ => return None,
    };
    built.ok()
}

fn needs_relocation(value: &Value, modifier: Option<Modifier>) -> bool {
    modifier.is_some() || !matches!(value, Value::Abs(_))
}

/// Name tables and the legacy forms of every mnemonic
pub(crate) struct X86Encoder {
    mnemonics: HashMap<String, Mnemonic>,
    registers: HashMap<String, Register>,
    forms: HashMap<Mnemonic, Vec<Code>>,
}

impl X86Encoder {
    pub fn new() -> Self {
        let mnemonics = Mnemonic::values()
            .filter(|m| *m != Mnemonic::INVALID)
            .map(|m| (format!("{:?}", m).to_ascii_lowercase(), m))
            .collect();
        let registers = Register::values()
            .filter(|r| *r != Register::None)
            .map(|r| (format!("{:?}", r).to_ascii_lowercase(), r))
            .collect();
        let mut forms: HashMap<Mnemonic, Vec<Code>> = HashMap::new();
        for code in Code::values() {
            let op_code = code.op_code();
            if op_code.is_instruction() && op_code.mode64() && op_code.encoding() == EncodingKind::Legacy {
                forms.entry(op_code.mnemonic()).or_default().push(code);
            }
        }
        trace!("x86_64 encoder: {} mnemonics with legacy forms", forms.len());
        X86Encoder {
            mnemonics,
            registers,
            forms,
        }
    }

    /// Mnemonics an AT&T name may stand for
    fn readings(&self, name: &str) -> Vec<Reading> {
        let lower = name.to_ascii_lowercase();
        let renamed = match lower.as_str() {
            "cbtw" => Some(Mnemonic::Cbw),
            "cwtl" => Some(Mnemonic::Cwde),
            "cltq" => Some(Mnemonic::Cdqe),
            "cwtd" => Some(Mnemonic::Cwd),
            "cltd" => Some(Mnemonic::Cdq),
            "cqto" => Some(Mnemonic::Cqo),
            _ => None,
        };
        if let Some(mnemonic) = renamed {
            return vec![Reading::plain(mnemonic)];
        }
        match lower.as_str() {
            "movabs" | "movabsq" => {
                return vec![Reading {
                    imm64: true,
                    ..Reading::plain(Mnemonic::Mov)
                }];
            }
            "movslq" => {
                return vec![Reading {
                    sizes: SizeRule::Extend { src: 4, dst: 8 },
                    ..Reading::plain(Mnemonic::Movsxd)
                }];
            }
            _ => {}
        }
        let bytes = lower.as_bytes();
        if bytes.len() == 6 && (lower.starts_with("movz") || lower.starts_with("movs")) {
            if let (Some(src), Some(dst)) = (suffix_size(bytes[4]), suffix_size(bytes[5])) {
                if src < dst {
                    let mnemonic = if bytes[3] == b'z' { Mnemonic::Movzx } else { Mnemonic::Movsx };
                    return vec![Reading {
                        sizes: SizeRule::Extend { src, dst },
                        ..Reading::plain(mnemonic)
                    }];
                }
            }
        }

        let mut readings = Vec::new();
        if let Some(mnemonic) = self.mnemonics.get(&lower) {
            readings.push(Reading::plain(*mnemonic));
        }
        if let Some((&last, stem)) = bytes.split_last() {
            if let (Some(size), Some(mnemonic)) = (suffix_size(last), self.mnemonics.get(&lower[..stem.len()])) {
                readings.push(Reading {
                    sizes: SizeRule::Uniform(size),
                    ..Reading::plain(*mnemonic)
                });
            }
        }
        readings
    }

    /// `%name` at the start of `tokens`
    fn register_at(&self, tokens: &[Token]) -> Result<Option<Register>, AsmError> {
        match tokens {
            [percent, name, ..] if is_punct(percent, "%") => match &name.kind {
                TokenKind::Ident(ident) => self
                    .registers
                    .get(&ident.to_ascii_lowercase())
                    .copied()
                    .map(Some)
                    .ok_or_else(|| AsmError::new(name.loc.clone(), format!("bad register name '%{}'", ident))),
                _ => Err(AsmError::new(name.loc.clone(), "expected a register name after '%'")),
            },
            [percent] if is_punct(percent, "%") => Err(AsmError::new(
                percent.loc.clone(),
                "expected a register name after '%'",
            )),
            _ => Ok(None),
        }
    }

    /// Expression with an optional trailing `@SPECIFIER`
    fn expression(
        &self,
        tokens: &[Token],
        loc: &SourceLoc,
        env: &mut dyn SymbolEnv,
    ) -> Result<(Value, Option<Modifier>), AsmError> {
        let (tokens, modifier) = match tokens {
            [head @ .., at, name] if is_punct(at, "@") => match &name.kind {
                TokenKind::Ident(ident) => {
                    let modifier = Modifier::from_name(ident).ok_or_else(|| {
                        AsmError::new(name.loc.clone(), format!("unsupported relocation specifier '@{}'", ident))
                    })?;
                    (head, Some(modifier))
                }
                _ => return Err(AsmError::new(name.loc.clone(), "expected a relocation specifier after '@'")),
            },
            _ => (tokens, None),
        };
        let end = tokens.last().map_or_else(|| loc.clone(), |t| t.loc.clone());
        let mut cursor = TokenCursor::new(tokens, end);
        let value = parse_expr(&mut cursor, env)?;
        cursor.expect_end()?;
        Ok((value, modifier))
    }

    /// `(base, index, scale)` with any part left out
    fn register_list(&self, tokens: &[Token]) -> Result<(Register, Register, u32), AsmError> {
        let Some((open, after_open)) = tokens.split_first() else {
            return Ok((Register::None, Register::None, 1));
        };
        let Some((close, inner)) = after_open.split_last().filter(|(close, _)| is_punct(close, ")")) else {
            return Err(AsmError::new(open.loc.clone(), "expected ')' to end memory operand"));
        };
        let parts: Vec<&[Token]> = inner.split(|t| is_punct(t, ",")).collect();
        let register = |part: &[Token]| -> Result<Register, AsmError> {
            if part.is_empty() {
                return Ok(Register::None);
            }
            match self.register_at(part)? {
                Some(register) if part.len() == 2 => Ok(register),
                _ => Err(AsmError::new(part[0].loc.clone(), "expected a register in memory operand")),
            }
        };
        let base = register(parts[0])?;
        let index = match parts.get(1) {
            Some(part) => register(part)?,
            None => Register::None,
        };
        let scale = match parts.get(2).copied() {
            None | Some([]) => 1,
            Some(
                [
                    Token {
                        kind: TokenKind::Int(n @ (1 | 2 | 4 | 8)),
                        ..
                    },
                ],
            ) => *n as u32,
            Some(part) => {
                return Err(AsmError::new(part[0].loc.clone(), "scale factor must be 1, 2, 4 or 8"));
            }
        };
        if parts.len() > 3 {
            return Err(AsmError::new(close.loc.clone(), "too many registers in memory operand"));
        }
        Ok((base, index, scale))
    }

    fn parse_operand(&self, tokens: &[Token], loc: &SourceLoc, env: &mut dyn SymbolEnv) -> Result<Operand, AsmError> {
        let (indirect, tokens) = match tokens.split_first() {
            Some((star, rest)) if is_punct(star, "*") => (true, rest),
            _ => (false, tokens),
        };
        let Some(first) = tokens.first() else {
            return Err(AsmError::new(loc.clone(), "missing operand"));
        };
        if is_punct(first, "$") {
            let (value, modifier) = self.expression(&tokens[1..], &first.loc, env)?;
            return Ok(Operand {
                kind: OperandKind::Imm(value),
                modifier,
                indirect,
            });
        }

        let mut rest = tokens;
        let mut segment = Register::None;
        if let Some(register) = self.register_at(rest)? {
            match rest.get(2) {
                None => {
                    return Ok(Operand {
                        kind: OperandKind::Reg(register),
                        modifier: None,
                        indirect,
                    });
                }
                Some(colon) if is_punct(colon, ":") => {
                    segment = register;
                    rest = &rest[3..];
                }
                Some(other) => return Err(AsmError::new(other.loc.clone(), "unexpected token after register")),
            }
        }

        // the parenthesis opening a register list, not a grouping
        let mut depth = 0usize;
        let mut paren = None;
        for (i, token) in rest.iter().enumerate() {
            match token.kind {
                TokenKind::Punct("(")
                    if depth == 0 && rest.get(i + 1).is_some_and(|t| is_punct(t, "%") || is_punct(t, ",")) =>
                {
                    paren = Some(i);
                    break;
                }
                TokenKind::Punct("(") => depth += 1,
                TokenKind::Punct(")") => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        let (disp_tokens, list) = rest.split_at(paren.unwrap_or(rest.len()));
        let (disp, modifier) = if disp_tokens.is_empty() {
            (Value::Abs(0), None)
        } else {
            self.expression(disp_tokens, loc, env)?
        };
        let (base, index, scale) = if list.is_empty() {
            (Register::None, Register::None, 1)
        } else {
            self.register_list(list)?
        };
        Ok(Operand {
            kind: OperandKind::Mem(Memory {
                segment,
                disp,
                base,
                index,
                scale,
            }),
            modifier,
            indirect,
        })
    }

    fn arg(&self, operand: &Operand, branch: bool, loc: &SourceLoc) -> Result<Arg, AsmError> {
        Ok(match &operand.kind {
            OperandKind::Reg(register) => Arg::Reg(*register),
            OperandKind::Imm(Value::Abs(n)) if operand.modifier.is_none() => Arg::Imm(*n),
            OperandKind::Imm(_) => Arg::Imm(PLACEHOLDER),
            OperandKind::Mem(memory) if branch && !operand.indirect && memory.is_bare() => Arg::Branch,
            OperandKind::Mem(memory) if memory.base == Register::RIP => Arg::Mem(MemoryOperand::new(
                Register::RIP,
                memory.index,
                memory.scale,
                0,
                1,
                false,
                memory.segment,
            )),
            OperandKind::Mem(memory) => {
                let (displacement, size) = match memory.disp {
                    Value::Abs(n) if operand.modifier.is_none() => {
                        let n = i32::try_from(n).map_err(|_| {
                            AsmError::new(loc.clone(), format!("displacement {:#x} does not fit in 32 bits", n))
                        })?;
                        let size = if memory.base == Register::None {
                            4
                        } else if n == 0 {
                            0
                        } else if i8::try_from(n).is_ok() {
                            1
                        } else {
                            4
                        };
                        (n as i64, size)
                    }
                    _ => (PLACEHOLDER, 4),
                };
                Arg::Mem(MemoryOperand::new(
                    memory.base,
                    memory.index,
                    memory.scale,
                    displacement,
                    size,
                    false,
                    memory.segment,
                ))
            }
        })
    }

    /// Encode one instruction with its AT&T operand tokens.
    pub fn encode(
        &self,
        name: &str,
        tokens: &[Token],
        loc: &SourceLoc,
        env: &mut dyn SymbolEnv,
    ) -> Result<EncodedInstruction, AsmError> {
        let readings = self.readings(name);
        if readings.is_empty() {
            return Err(AsmError::new(loc.clone(), format!("unknown instruction '{}'", name)));
        }
        let mut operands = Vec::new();
        if !tokens.is_empty() {
            for part in split_operands(tokens) {
                operands.push(self.parse_operand(part, loc, env)?);
            }
        }
        // iced takes operands in Intel order
        operands.reverse();

        let forms: Vec<(Reading, Code)> = readings
            .iter()
            .flat_map(|reading| {
                self.forms
                    .get(&reading.mnemonic)
                    .into_iter()
                    .flatten()
                    .map(move |code| (*reading, *code))
            })
            .collect();
        let branch = forms.iter().any(|(_, code)| is_rel32(code.op_code()));
        let args = operands
            .iter()
            .map(|operand| self.arg(operand, branch, loc))
            .collect::<Result<Vec<_>, _>>()?;
        let has_branch = args.iter().any(|arg| matches!(arg, Arg::Branch));
        let has_memory = args.iter().any(|arg| matches!(arg, Arg::Mem(_)));

        let mut candidates = Vec::new();
        for (reading, code) in &forms {
            let op_code = code.op_code();
            if op_code.op_count() as usize != args.len()
                || (reading.imm64 && *code != Code::Mov_r64_imm64)
                || is_rel32(op_code) != has_branch
            {
                continue;
            }
            let Some(instr) = build(*code, &args) else {
                continue;
            };
            if !sizes_match(reading.sizes, &instr, op_code) {
                continue;
            }
            let immediates_fit = args.iter().enumerate().all(|(i, arg)| match arg {
                Arg::Imm(value) => immediate_fits(instr.op_kind(i as u32), *value),
                _ => true,
            });
            if !immediates_fit {
                continue;
            }
            let mut encoder = Encoder::new(64);
            if encoder.encode(&instr, 0).is_err() {
                continue;
            }
            let memory_size = if has_memory { instr.memory_size().size() } else { 0 };
            candidates.push(Candidate {
                instr,
                offsets: encoder.get_constant_offsets(),
                bytes: encoder.take_buffer(),
                memory_size,
                default64: op_code.default_op_size64() || op_code.force_op_size64(),
            });
        }
        if candidates.is_empty() {
            return Err(AsmError::new(loc.clone(), format!("invalid operands for '{}'", name)));
        }

        // without a suffix or register only stack and branch forms default to 64 bits
        let distinct_sizes = |candidates: &[Candidate]| {
            let mut sizes: Vec<usize> = candidates.iter().map(|c| c.memory_size).filter(|s| *s != 0).collect();
            sizes.sort_unstable();
            sizes.dedup();
            sizes.len()
        };
        if distinct_sizes(&candidates) > 1 {
            candidates.retain(|c| c.default64);
            if distinct_sizes(&candidates) != 1 {
                return Err(AsmError::new(
                    loc.clone(),
                    format!("ambiguous operand size for '{}'; add a size suffix", name),
                ));
            }
        }
        let Some(chosen) = candidates
            .into_iter()
            .reduce(|best, c| if c.bytes.len() < best.bytes.len() { c } else { best })
        else {
            return Err(AsmError::new(loc.clone(), format!("invalid operands for '{}'", name)));
        };

        let mut bytes = chosen.bytes;
        let len = bytes.len();
        let mut fixups = Vec::new();
        for (i, (operand, arg)) in operands.iter().zip(&args).enumerate() {
            match (&operand.kind, arg) {
                (OperandKind::Mem(memory), Arg::Branch) => {
                    let r_type = match (&memory.disp, operand.modifier) {
                        (Value::Abs(_), _) => {
                            return Err(AsmError::new(loc.clone(), "branch target must be a label or symbol"));
                        }
                        (_, Some(Modifier::Plt)) => elf::R_X86_64_PLT32,
                        (Value::Sym { name, .. }, None) if !is_temporary(name) => elf::R_X86_64_PLT32,
                        (_, None) => elf::R_X86_64_PC32,
                        (_, Some(_)) => {
                            return Err(AsmError::new(loc.clone(), "unsupported relocation specifier on branch target"));
                        }
                    };
                    fixups.push(Fixup {
                        offset: len - 4,
                        r_type,
                        value: memory.disp.clone(),
                        addend: -4,
                    });
                }
                (OperandKind::Imm(value), _) if needs_relocation(value, operand.modifier) => {
                    let r_type = match (operand.modifier, chosen.instr.op_kind(i as u32)) {
                        (Some(Modifier::TpOff), OpKind::Immediate32 | OpKind::Immediate32to64) => {
                            elf::R_X86_64_TPOFF32
                        }
                        (None, OpKind::Immediate32to64) => elf::R_X86_64_32S,
                        (None, OpKind::Immediate32) => elf::R_X86_64_32,
                        (None, OpKind::Immediate64) => elf::R_X86_64_64,
                        _ => {
                            return Err(AsmError::new(loc.clone(), "unsupported relocation for immediate operand"));
                        }
                    };
                    fixups.push(Fixup {
                        offset: chosen.offsets.immediate_offset(),
                        r_type,
                        value: value.clone(),
                        addend: 0,
                    });
                }
                (OperandKind::Mem(memory), Arg::Mem(_)) if memory.base == Register::RIP => {
                    let offset = chosen.offsets.displacement_offset();
                    let r_type = match (&memory.disp, operand.modifier) {
                        (Value::Abs(n), None) => {
                            let n = i32::try_from(*n).map_err(|_| {
                                AsmError::new(loc.clone(), format!("displacement {:#x} does not fit in 32 bits", n))
                            })?;
                            bytes[offset..offset + 4].copy_from_slice(&n.to_le_bytes());
                            continue;
                        }
                        (_, None) => elf::R_X86_64_PC32,
                        (_, Some(Modifier::GotPcRel)) => elf::R_X86_64_GOTPCREL,
                        (_, Some(Modifier::GotTpOff)) => elf::R_X86_64_GOTTPOFF,
                        (_, Some(_)) => {
                            return Err(AsmError::new(loc.clone(), "unsupported relocation for RIP-relative operand"));
                        }
                    };
                    // the field is relative to the end of the instruction
                    fixups.push(Fixup {
                        offset,
                        r_type,
                        value: memory.disp.clone(),
                        addend: offset as i64 - len as i64,
                    });
                }
                (OperandKind::Mem(memory), Arg::Mem(_)) if needs_relocation(&memory.disp, operand.modifier) => {
                    let r_type = match operand.modifier {
                        None => elf::R_X86_64_32S,
                        Some(Modifier::TpOff) => elf::R_X86_64_TPOFF32,
                        Some(_) => {
                            return Err(AsmError::new(loc.clone(), "unsupported relocation for memory operand"));
                        }
                    };
                    fixups.push(Fixup {
                        offset: chosen.offsets.displacement_offset(),
                        r_type,
                        value: memory.disp.clone(),
                        addend: 0,
                    });
                }
                _ => {}
            }
        }
        for fixup in &fixups {
            let size = if fixup.r_type == elf::R_X86_64_64 { 8 } else { 4 };
            bytes[fixup.offset..fixup.offset + size].fill(0);
        }
        trace!("{} -> {:?} {:02x?}", name, chosen.instr.code(), bytes);
        Ok(EncodedInstruction { bytes, fixups })
    }
}
