//! C5: one handler per opcode (spec §4.6), plus the inner dispatch loop
//! that walks a statement chain across `:` and EOL boundaries (spec §4.3).
//! Each handler is a small, mostly-linear function over the active byte
//! buffer and a cursor, the same granularity `chip8::opcodes` uses per
//! CHIP-8 instruction.

use crate::error::RuntimeError;
use crate::opcode::{self, Keyword};
use crate::program::ProgramStore;
use crate::tokenizer;
use crate::value::{self, Int};

use super::control_stack::FrameKind;
use super::executor::{Flow, Host, Interpreter};
use super::expr::{self, EvalEnv, ExprState};
use super::scan;
use super::Frame;

struct ExecEnv<'a, 'h> {
    registers: &'a [Int; 26],
    array: &'a [Int],
    host: &'a mut Host<'h>,
}

impl<'a, 'h> EvalEnv for ExecEnv<'a, 'h> {
    fn get_var(&self, index: u8) -> Int {
        self.registers[index as usize]
    }

    fn get_array(&self, index: Int) -> Result<Int, RuntimeError> {
        let i = index as isize;
        if i < 0 || i as usize >= self.array.len() {
            return Err(RuntimeError::ArrayIndexOver);
        }
        Ok(self.array[i as usize])
    }

    fn rnd(&mut self, bound: Int) -> Int {
        self.host.random.next(bound.max(0) as u32) as Int
    }

    fn inp(&mut self, pin: Int) -> Result<Int, RuntimeError> {
        self.host.gpio.read(pin as u32).map(|v| v as Int).map_err(Into::into)
    }

    fn adc(&mut self, channel: Int) -> Result<Int, RuntimeError> {
        self.host.gpio.adc_read(channel as u32).map(|v| v as Int).map_err(Into::into)
    }

    fn inkey(&mut self) -> Int {
        self.host.console.get_char().map(|b| b as Int).unwrap_or(-1)
    }

    fn tick(&self) -> Int {
        self.host.clock.tick_ms() as Int
    }
}

fn eval(interp: &Interpreter, bytes: &[u8], pos: usize, host: &mut Host<'_>) -> Result<(Int, usize), RuntimeError> {
    let mut state = ExprState::new(bytes, pos);
    let mut env = ExecEnv { registers: &interp.registers, array: &interp.array, host };
    let value = expr::evaluate(&mut state, &mut env, &interp.config)?;
    Ok((value, state.pos))
}

/// Consumes the literal byte `b` at `pos`, or reports a syntax error.
fn expect(bytes: &[u8], pos: usize, b: u8) -> Result<usize, RuntimeError> {
    if bytes.get(pos) == Some(&b) {
        Ok(pos + 1)
    } else {
        Err(RuntimeError::Syntax)
    }
}

fn expect_keyword(bytes: &[u8], pos: usize, kw: Keyword) -> Result<usize, RuntimeError> {
    if bytes.get(pos).copied() == Some(kw.opcode()) {
        Ok(pos + 1)
    } else {
        Err(RuntimeError::Syntax)
    }
}

/// Runs a single line typed at the `OK` prompt (spec §6.3). Tokenized into
/// an ephemeral, unframed buffer with no length prefix: a cross-buffer
/// jump (`GOTO`/`GOSUB`/`RETURN`/an implicit-`GOTO` `IF`) can't be resolved
/// inside this buffer, so it bubbles out as `Flow::Goto` for
/// [`Interpreter::settle`] to resolve against the program store instead.
pub fn execute_repl(interp: &mut Interpreter, raw: &str, host: &mut Host<'_>) -> Result<Flow, RuntimeError> {
    let mut bytes = Vec::new();
    tokenizer::tokenize(raw, &mut bytes, interp.config.max_line_len)?;
    dispatch_statements(interp, &bytes, 0, false, host)
}

/// Runs from `start` in the program store's own bytes while in
/// [`super::Mode::Run`] (spec §4.3). Every `Flow::Goto` here targets the
/// same buffer, so it's resolved internally; only `Stop`/`End`/`EnterProg`
/// and errors ever return to the caller.
pub fn execute_run(
    interp: &mut Interpreter,
    bytes: &[u8],
    start: usize,
    host: &mut Host<'_>,
) -> Result<Flow, RuntimeError> {
    dispatch_statements(interp, bytes, start, true, host)
}

/// The shared inner loop (spec §4.3 step 3): advances past whitespace,
/// `:`, and comments as no-ops; crosses an EOL to the next stored line
/// when `framed` (otherwise that ends a REPL line); dispatches one
/// statement at a time, looping on `Flow::Next` regardless of how far or
/// how many lines away it points. Break is polled once per dispatch, but
/// only in `framed` (Run-mode) buffers — a REPL line never blocks on it,
/// matching where the old per-line fetch loop used to poll.
fn dispatch_statements(
    interp: &mut Interpreter,
    bytes: &[u8],
    start: usize,
    framed: bool,
    host: &mut Host<'_>,
) -> Result<Flow, RuntimeError> {
    let mut pos = start;
    loop {
        if framed {
            interp.set_pc(pos);
            if host.console.get_char() == Some(0x03) {
                return Err(RuntimeError::Break);
            }
        }

        match bytes.get(pos).copied() {
            None => return if framed { Ok(Flow::End) } else { Ok(Flow::Next) },
            Some(opcode::EOL) => {
                if !framed {
                    return Ok(Flow::Next);
                }
                let len_pos = pos + 1;
                if len_pos >= bytes.len() {
                    return Ok(Flow::End);
                }
                pos = len_pos + 1;
                continue;
            }
            Some(b':') | Some(b' ') | Some(b'\t') => {
                pos += 1;
                continue;
            }
            Some(opcode::COMMENT_MARK) => {
                while !matches!(bytes.get(pos).copied(), None | Some(opcode::EOL)) {
                    pos += 1;
                }
                continue;
            }
            _ => {}
        }

        let stmt_start = pos;
        let (flow, next) = execute_statement(interp, bytes, stmt_start, framed, host)?;
        if framed {
            interp.set_pc(next);
        }
        match flow {
            Flow::Next => {
                pos = next;
            }
            Flow::Goto(target) => {
                if framed {
                    pos = scan::skip_label(bytes, target);
                } else {
                    return Ok(Flow::Goto(target));
                }
            }
            other => return Ok(other),
        }
    }
}

fn execute_statement(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    framed: bool,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let first = bytes[pos];
    if let Some(kw) = Keyword::from_opcode(first) {
        execute_keyword(kw, interp, bytes, pos + 1, pos, framed, host)
    } else {
        execute_assignment(interp, bytes, pos, host)
    }
}

fn execute_keyword(
    kw: Keyword,
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    stmt_start: usize,
    framed: bool,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    match kw {
        Keyword::Print => exec_print(interp, bytes, pos, host),
        Keyword::Input => exec_input(interp, bytes, pos, host),
        Keyword::Goto => exec_goto(interp, bytes, pos, host),
        Keyword::Gosub => exec_gosub(interp, bytes, pos, host),
        Keyword::Return => exec_return(interp, pos),
        Keyword::For => exec_for(interp, bytes, pos, framed, host),
        Keyword::Next => exec_next(interp, pos),
        Keyword::Do => exec_do(interp, pos),
        Keyword::Loop => exec_loop(interp, bytes, pos, host),
        Keyword::While => exec_while(interp, bytes, pos, stmt_start, framed, host),
        Keyword::If => exec_if(interp, bytes, pos, framed, host),
        Keyword::Elseif | Keyword::Else => exec_skip_rest_of_if(bytes, stmt_start, framed),
        Keyword::Endif => Ok((Flow::Next, pos)),
        Keyword::Run => {
            interp.reset_state();
            Ok((Flow::Goto(0), pos))
        }
        Keyword::New => {
            interp.program.clear();
            interp.reset_state();
            Ok((Flow::Next, pos))
        }
        Keyword::List => {
            list_program(&interp.program, host.console);
            Ok((Flow::Next, pos))
        }
        Keyword::Prog => Ok((Flow::EnterProg, pos)),
        Keyword::Save => exec_save(interp, bytes, pos, host),
        Keyword::Load => exec_load(interp, host),
        Keyword::Resume => match interp.resume.take() {
            Some(target) => Ok((Flow::Goto(target), pos)),
            None => Err(RuntimeError::CantResume),
        },
        Keyword::Stop => Ok((Flow::Stop, pos)),
        Keyword::End => Ok((Flow::End, pos)),
        Keyword::Reset => host.system.reset(),
        Keyword::Delay | Keyword::Pause => exec_delay(interp, bytes, pos, host),
        Keyword::Randomize => exec_randomize(interp, bytes, pos, host),
        Keyword::Data => exec_data(bytes, pos),
        Keyword::Read => exec_read(interp, bytes, pos),
        Keyword::Restore => {
            interp.data.reset();
            Ok((Flow::Next, pos))
        }
        Keyword::Outp => exec_outp(interp, bytes, pos, host),
        Keyword::Pwm => exec_pwm(interp, bytes, pos, host),
        Keyword::Continue => exec_continue(interp, pos),
        Keyword::Exit => exec_exit(interp, bytes, framed, host),
        // `TO`/`STEP`/`THEN` are only ever consumed inline by their owning
        // statement (`FOR`/`IF`); reaching one as a line's own leading
        // opcode is a malformed program.
        Keyword::To | Keyword::Step | Keyword::Then => Err(RuntimeError::Syntax),
        // Function/system-variable keywords never start a statement.
        Keyword::Rnd
        | Keyword::Abs
        | Keyword::Inp
        | Keyword::Adc
        | Keyword::Inkey
        | Keyword::Chr
        | Keyword::Dec
        | Keyword::Hex
        | Keyword::Tick => Err(RuntimeError::Syntax),
    }
}

// ---- PRINT ---------------------------------------------------------------

/// Is `pos` one of `PRINT`'s list-ending delimiters (spec §4.6): end of
/// buffer, `:`, EOL, a comment, or one of `ELSE`/`ELSEIF`/`ENDIF` closing
/// the `IF` a `PRINT` sits inside.
fn is_print_delimiter(bytes: &[u8], pos: usize) -> bool {
    match bytes.get(pos).copied() {
        None | Some(opcode::EOL) | Some(b':') | Some(opcode::COMMENT_MARK) => true,
        Some(b) => matches!(Keyword::from_opcode(b), Some(Keyword::Else | Keyword::Elseif | Keyword::Endif)),
    }
}

fn exec_print(
    interp: &mut Interpreter,
    bytes: &[u8],
    mut pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let mut suppress_newline = false;
    while !is_print_delimiter(bytes, pos) {
        pos = print_item(interp, bytes, pos, host)?;
        suppress_newline = false;
        match bytes.get(pos).copied() {
            Some(b',') => {
                host.console.put_char(b'\t');
                pos += 1;
            }
            Some(b';') => {
                pos += 1;
                suppress_newline = true;
            }
            _ => break,
        }
    }
    if !suppress_newline {
        host.console.put_char(b'\r');
        host.console.put_char(b'\n');
    }
    Ok((Flow::Next, pos))
}

fn print_item(
    interp: &Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<usize, RuntimeError> {
    match bytes.get(pos).copied() {
        Some(opcode::STRING_MARK) => Ok(print_string(bytes, pos + 1, host.console)),
        Some(b) if b == Keyword::Chr.opcode() => {
            let pos = expect(bytes, pos + 1, b'(')?;
            let (value, pos) = eval(interp, bytes, pos, host)?;
            let pos = expect(bytes, pos, b')')?;
            print_chr(value, host.console);
            Ok(pos)
        }
        Some(b) if b == Keyword::Dec.opcode() || b == Keyword::Hex.opcode() => {
            let hex = b == Keyword::Hex.opcode();
            let pos = expect(bytes, pos + 1, b'(')?;
            let (value, pos) = eval(interp, bytes, pos, host)?;
            let (width, pos) = if bytes.get(pos) == Some(&b',') {
                let (w, pos) = eval(interp, bytes, pos + 1, host)?;
                (Some(w), pos)
            } else {
                (None, pos)
            };
            let pos = expect(bytes, pos, b')')?;
            print_formatted(value, width, hex, host.console);
            Ok(pos)
        }
        _ => {
            let (value, pos) = eval(interp, bytes, pos, host)?;
            print_formatted(value, None, false, host.console);
            Ok(pos)
        }
    }
}

/// Copies a string literal's body to the console, expanding `\`-escapes,
/// stopping at (and consuming) the closing `"`.
fn print_string(bytes: &[u8], mut pos: usize, console: &mut dyn crate::host::Console) -> usize {
    while let Some(&b) = bytes.get(pos) {
        if b == opcode::STRING_MARK {
            return pos + 1;
        }
        if b == b'\\' {
            let (out, consumed) = decode_escape(bytes, pos + 1);
            for byte in out {
                console.put_char(byte);
            }
            pos += 1 + consumed;
            continue;
        }
        console.put_char(b);
        pos += 1;
    }
    pos
}

/// Decodes one `\`-escape starting right after the backslash (spec §4.6):
/// the C named escapes, `\xHH` (1-2 hex digits), and `\ooo` (1-3 octal
/// digits). Returns the expanded bytes and how many input bytes past the
/// backslash were consumed.
fn decode_escape(bytes: &[u8], pos: usize) -> (Vec<u8>, usize) {
    match bytes.get(pos).copied() {
        Some(b'a') => (vec![0x07], 1),
        Some(b'b') => (vec![0x08], 1),
        Some(b'f') => (vec![0x0C], 1),
        Some(b'n') => (vec![b'\n'], 1),
        Some(b'r') => (vec![b'\r'], 1),
        Some(b't') => (vec![b'\t'], 1),
        Some(b'v') => (vec![0x0B], 1),
        Some(b'\\') => (vec![b'\\'], 1),
        Some(b'\'') => (vec![b'\''], 1),
        Some(b'"') => (vec![b'"'], 1),
        Some(b'?') => (vec![b'?'], 1),
        Some(b'x') => {
            let mut n = 0usize;
            let mut value: u32 = 0;
            while n < 2 {
                match bytes.get(pos + 1 + n).copied() {
                    Some(d) if d.is_ascii_hexdigit() => {
                        value = value * 16 + (d as char).to_digit(16).unwrap();
                        n += 1;
                    }
                    _ => break,
                }
            }
            if n == 0 {
                (vec![b'x'], 1)
            } else {
                (vec![value as u8], 1 + n)
            }
        }
        Some(d) if (b'0'..=b'7').contains(&d) => {
            let mut n = 0usize;
            let mut value: u32 = 0;
            while n < 3 {
                match bytes.get(pos + n).copied() {
                    Some(o) if (b'0'..=b'7').contains(&o) => {
                        value = value * 8 + (o - b'0') as u32;
                        n += 1;
                    }
                    _ => break,
                }
            }
            (vec![value as u8], n)
        }
        Some(other) => (vec![other], 1),
        None => (vec![], 0),
    }
}

/// `CHR`: emits the value's bit pattern as one byte, or two big-endian
/// bytes if it doesn't fit in one (spec §4.6).
fn print_chr(value: Int, console: &mut dyn crate::host::Console) {
    let bits = value::unsigned_bits(value);
    if bits < 256 {
        console.put_char(bits as u8);
    } else {
        console.put_char((bits >> 8) as u8);
        console.put_char(bits as u8);
    }
}

fn print_formatted(value: Int, width: Option<Int>, hex: bool, console: &mut dyn crate::host::Console) {
    let text = format_number(value, width, hex);
    for b in text.bytes() {
        console.put_char(b);
    }
}

fn format_number(value: Int, width: Option<Int>, hex: bool) -> String {
    let (digits, negative) = if hex {
        (format!("{:X}", value::unsigned_bits(value)), false)
    } else {
        let negative = value < 0;
        let magnitude = (value as i64).unsigned_abs();
        (magnitude.to_string(), negative)
    };
    match width {
        None => {
            if negative {
                format!("-{digits}")
            } else {
                digits
            }
        }
        // HEX never prints a sign and never takes the `|w|>=100` decimal
        // point — that rule is DEC-only (spec §4.6).
        Some(w) => format_width(&digits, negative, w as i64, !hex),
    }
}

/// DEC/HEX width formatting (spec §4.6): negative width zero-pads,
/// positive width space-pads, and `|w|>=100` splits the width into whole
/// and decimal parts (`w / 100` digits after the point) for DEC only.
fn format_width(digits: &str, negative: bool, w: i64, allow_point: bool) -> String {
    let zero_pad = w < 0;
    let mag_w = w.unsigned_abs() as usize;
    let decimals = if allow_point && mag_w >= 100 { mag_w / 100 } else { 0 };
    let base_width = if decimals > 0 { mag_w % 100 } else { mag_w };
    let total_width = base_width + decimals;

    if zero_pad {
        let digit_target =
            (if decimals > 0 { total_width - 1 } else { total_width }).saturating_sub(if negative { 1 } else { 0 });
        let mut padded = digits.to_string();
        if padded.len() < digit_target {
            padded = "0".repeat(digit_target - padded.len()) + &padded;
        }
        let pointed = insert_point(&padded, decimals);
        if negative {
            format!("-{pointed}")
        } else {
            pointed
        }
    } else {
        let pointed = insert_point(digits, decimals);
        let signed = if negative { format!("-{pointed}") } else { pointed };
        if signed.len() < total_width {
            " ".repeat(total_width - signed.len()) + &signed
        } else {
            signed
        }
    }
}

fn insert_point(digits: &str, decimals: usize) -> String {
    if decimals == 0 || decimals >= digits.len() {
        return digits.to_string();
    }
    let split = digits.len() - decimals;
    format!("{}.{}", &digits[..split], &digits[split..])
}

// ---- INPUT ----------------------------------------------------------------

fn exec_input(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let var = bytes.get(pos).copied().filter(|b| b.is_ascii_uppercase()).ok_or(RuntimeError::Syntax)?;
    let next = pos + 1;
    host.console.put_char(b'?');
    let mut buf = Vec::new();
    loop {
        match host.console.get_char() {
            Some(b'\r') | Some(b'\n') => break,
            Some(b) => {
                host.console.put_char(b);
                buf.push(b);
            }
            None => continue,
        }
    }
    let text = std::str::from_utf8(&buf).map_err(|_| RuntimeError::Syntax)?;
    let trimmed = text.trim();
    let value: Int = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex_digits) => {
            let magnitude = i64::from_str_radix(hex_digits, 16).map_err(|_| RuntimeError::Syntax)?;
            Int::try_from(magnitude).map_err(|_| RuntimeError::Syntax)?
        }
        None => trimmed.parse().map_err(|_| RuntimeError::Syntax)?,
    };
    interp.registers[(var - b'A') as usize] = value;
    Ok((Flow::Next, next))
}

// ---- GOTO / GOSUB / RETURN -------------------------------------------------

fn exec_goto(
    interp: &Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (target, next) = eval(interp, bytes, pos, host)?;
    let addr = interp.program.find_label(target).ok_or(RuntimeError::LabelNotFound)?;
    Ok((Flow::Goto(addr), next))
}

fn exec_gosub(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (target, next) = eval(interp, bytes, pos, host)?;
    let addr = interp.program.find_label(target).ok_or(RuntimeError::LabelNotFound)?;
    interp.control.push(Frame::gosub(next))?;
    Ok((Flow::Goto(addr), next))
}

fn exec_return(interp: &mut Interpreter, pos: usize) -> Result<(Flow, usize), RuntimeError> {
    let frame = interp.control.pop_gosub()?;
    Ok((Flow::Goto(frame.target), pos))
}

// ---- FOR / NEXT -------------------------------------------------------------

fn exec_for(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    framed: bool,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let var = bytes.get(pos).copied().filter(|b| b.is_ascii_uppercase()).ok_or(RuntimeError::Syntax)?;
    let mut pos = expect(bytes, pos + 1, b'=')?;
    let (init, next) = eval(interp, bytes, pos, host)?;
    pos = next;
    pos = expect_keyword(bytes, pos, Keyword::To)?;
    let (limit, next) = eval(interp, bytes, pos, host)?;
    pos = next;
    let step = if bytes.get(pos).copied().and_then(Keyword::from_opcode) == Some(Keyword::Step) {
        let (step, next) = eval(interp, bytes, pos + 1, host)?;
        pos = next;
        step
    } else {
        1
    };

    interp.registers[(var - b'A') as usize] = init;
    let body_start = pos;
    let in_range = if step >= 0 { init <= limit } else { init >= limit };

    if !in_range {
        let close = scan::find_block_close(bytes, body_start, Keyword::For, Keyword::Next, framed)
            .ok_or(RuntimeError::LoopNothing)?;
        return Ok((Flow::Next, close + 1));
    }
    interp.control.push(Frame::for_loop(body_start, var - b'A', limit, step))?;
    Ok((Flow::Next, body_start))
}

fn exec_next(interp: &mut Interpreter, pos: usize) -> Result<(Flow, usize), RuntimeError> {
    let frame = *interp.control.top_for_mut()?;
    let candidate = interp.registers[frame.var as usize].wrapping_add(frame.step);
    let in_range = if frame.step >= 0 { candidate <= frame.limit } else { candidate >= frame.limit };
    if in_range {
        interp.registers[frame.var as usize] = candidate;
        Ok((Flow::Next, frame.target))
    } else {
        interp.control.pop_for()?;
        Ok((Flow::Next, pos))
    }
}

// ---- DO / LOOP / WHILE / EXIT / CONTINUE -----------------------------------

fn exec_do(interp: &mut Interpreter, pos: usize) -> Result<(Flow, usize), RuntimeError> {
    interp.control.push(Frame::do_loop(pos))?;
    Ok((Flow::Next, pos))
}

fn exec_loop(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let frame = *interp.control.top_do()?;
    if bytes.get(pos).copied().and_then(Keyword::from_opcode) == Some(Keyword::While) {
        let (cond, next) = eval(interp, bytes, pos + 1, host)?;
        if cond != 0 {
            return Ok((Flow::Next, frame.target));
        }
        interp.control.pop_do()?;
        Ok((Flow::Next, next))
    } else {
        Ok((Flow::Next, frame.target))
    }
}

/// Standalone `WHILE expr ... LOOP` form (spec §4.6, one of three `DO`/
/// `LOOP` shapes). `stmt_start` — the `WHILE` keyword's own opcode offset —
/// doubles as the loop's re-entry target, so a matching frame is pushed
/// only once and left alone on every later pass through the condition.
fn exec_while(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    stmt_start: usize,
    framed: bool,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (cond, next) = eval(interp, bytes, pos, host)?;
    let on_top = matches!(interp.control.top_do(), Ok(f) if f.target == stmt_start);
    if cond != 0 {
        if !on_top {
            interp.control.push(Frame::do_loop(stmt_start))?;
        }
        return Ok((Flow::Next, next));
    }
    if on_top {
        interp.control.pop_do()?;
    }
    let close = scan::find_block_close(bytes, next, Keyword::Do, Keyword::Loop, framed)
        .ok_or(RuntimeError::LoopNothing)?;
    Ok((Flow::Next, close + 1))
}

fn exec_exit(
    interp: &mut Interpreter,
    bytes: &[u8],
    framed: bool,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let frame = match interp.control.top_do() {
        Ok(f) => *f,
        Err(_) => *interp.control.top_for_mut()?,
    };
    let (open, close) = match frame.kind() {
        FrameKind::Do => (Keyword::Do, Keyword::Loop),
        FrameKind::For => (Keyword::For, Keyword::Next),
        FrameKind::Gosub => return Err(RuntimeError::UnexpectedExit),
    };
    let close_offset =
        scan::find_block_close(bytes, frame.target, open, close, framed).ok_or(RuntimeError::LoopNothing)?;
    let resume_at = match frame.kind() {
        FrameKind::Do => {
            interp.control.pop_do()?;
            skip_optional_loop_condition(interp, bytes, close_offset, host)?
        }
        FrameKind::For => {
            interp.control.pop_for()?;
            close_offset + 1
        }
        FrameKind::Gosub => unreachable!(),
    };
    Ok((Flow::Next, resume_at))
}

/// A `LOOP` closing a post-condition `DO`/`LOOP WHILE expr` may carry a
/// trailing condition that isn't a statement of its own; `EXIT` jumping
/// past that `LOOP` has to skip it too rather than trying to dispatch it.
fn skip_optional_loop_condition(
    interp: &Interpreter,
    bytes: &[u8],
    close_offset: usize,
    host: &mut Host<'_>,
) -> Result<usize, RuntimeError> {
    let pos = close_offset + 1;
    if bytes.get(pos).copied().and_then(Keyword::from_opcode) == Some(Keyword::While) {
        let (_, next) = eval(interp, bytes, pos + 1, host)?;
        Ok(next)
    } else {
        Ok(pos)
    }
}

fn exec_continue(interp: &mut Interpreter, pos: usize) -> Result<(Flow, usize), RuntimeError> {
    if let Ok(frame) = interp.control.top_do() {
        return Ok((Flow::Next, frame.target));
    }
    match interp.control.top_for_mut() {
        Ok(_) => exec_next(interp, pos),
        Err(_) => Err(RuntimeError::UnexpectedContinue),
    }
}

// ---- IF / ELSEIF / ELSE / ENDIF --------------------------------------------

fn exec_if(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    framed: bool,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (cond, next) = eval(interp, bytes, pos, host)?;
    let then_pos = expect_keyword(bytes, next, Keyword::Then)?;
    if cond != 0 {
        return branch_taken(interp, bytes, then_pos, host);
    }
    let mut search_from = then_pos;
    loop {
        let (offset, kw) =
            scan::find_if_branch(bytes, search_from, framed).ok_or(RuntimeError::EndifNotFound)?;
        match kw {
            Keyword::Endif => return Ok((Flow::Next, offset + 1)),
            Keyword::Else => return branch_taken(interp, bytes, offset + 1, host),
            Keyword::Elseif => {
                let (cond, next) = eval(interp, bytes, offset + 1, host)?;
                let then_pos = expect_keyword(bytes, next, Keyword::Then)?;
                if cond != 0 {
                    return branch_taken(interp, bytes, then_pos, host);
                }
                search_from = then_pos;
            }
            _ => unreachable!(),
        }
    }
}

/// A branch's first token after `THEN`/`ELSE`: a leading value literal
/// means the branch is bare and falling into it is an implicit `GOTO`
/// (spec §4.6); otherwise the branch's own statements start right here.
fn branch_taken(
    interp: &Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    match bytes.get(pos).copied() {
        Some(b) if opcode::is_inline_digit(b) || opcode::is_value_tag(b) => {
            let (target, next) = eval(interp, bytes, pos, host)?;
            let addr = interp.program.find_label(target).ok_or(RuntimeError::LabelNotFound)?;
            Ok((Flow::Goto(addr), next))
        }
        _ => Ok((Flow::Next, pos)),
    }
}

/// `ELSEIF`/`ELSE` reached by falling through a taken branch's body: the
/// remaining branches are discarded, jump straight past the matching
/// `ENDIF`.
fn exec_skip_rest_of_if(bytes: &[u8], stmt_start: usize, framed: bool) -> Result<(Flow, usize), RuntimeError> {
    let offset = scan::find_block_close(bytes, stmt_start, Keyword::If, Keyword::Endif, framed)
        .ok_or(RuntimeError::EndifNotFound)?;
    Ok((Flow::Next, offset + 1))
}

// ---- DATA / READ / RESTORE -------------------------------------------------

/// `DATA` is a no-op at run time — [`super::data_cursor::DataCursor`] scans
/// for it independently — but dispatch still has to step past its own
/// comma-separated literal payload rather than mistaking a literal for the
/// next statement's opcode.
fn exec_data(bytes: &[u8], mut pos: usize) -> Result<(Flow, usize), RuntimeError> {
    loop {
        let (_, consumed) = value::read_leading_literal(&bytes[pos..]).ok_or(RuntimeError::Syntax)?;
        pos += consumed;
        if bytes.get(pos) == Some(&b',') {
            pos += 1;
            continue;
        }
        break;
    }
    Ok((Flow::Next, pos))
}

fn exec_read(interp: &mut Interpreter, bytes: &[u8], mut pos: usize) -> Result<(Flow, usize), RuntimeError> {
    loop {
        let var = bytes.get(pos).copied().filter(|b| b.is_ascii_uppercase()).ok_or(RuntimeError::Syntax)?;
        pos += 1;
        let value = interp.data.read_next(&interp.program)?;
        interp.registers[(var - b'A') as usize] = value;
        if bytes.get(pos) == Some(&b',') {
            pos += 1;
            continue;
        }
        break;
    }
    Ok((Flow::Next, pos))
}

// ---- SAVE / LOAD ------------------------------------------------------------

fn exec_save(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (autorun, erase_only) = match bytes.get(pos).copied() {
        Some(b'!') => (true, false),
        Some(b'0') => (false, true),
        _ => (false, false),
    };
    crate::persistence::save(host.store, &interp.program, autorun, erase_only)?;
    Ok((Flow::Next, pos))
}

fn exec_load(interp: &mut Interpreter, host: &mut Host<'_>) -> Result<(Flow, usize), RuntimeError> {
    crate::persistence::load(host.store, &mut interp.program, interp.config.program_area_size)?;
    interp.control.clear();
    interp.data.reset();
    Ok((Flow::Next, 0))
}

// ---- DELAY / PAUSE / RANDOMIZE / OUTP / PWM --------------------------------

fn exec_delay(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (ms, next) = eval(interp, bytes, pos, host)?;
    let target = host.clock.tick_ms().wrapping_add(ms.max(0) as u32);
    while host.clock.tick_ms() < target {}
    Ok((Flow::Next, next))
}

fn exec_randomize(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (seed, next) = eval(interp, bytes, pos, host)?;
    host.random.seed(seed as i32);
    Ok((Flow::Next, next))
}

fn exec_outp(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (pin, next) = eval(interp, bytes, pos, host)?;
    let next = expect(bytes, next, b',')?;
    let (value, next) = eval(interp, bytes, next, host)?;
    host.gpio.write(pin as u32, value as u32)?;
    Ok((Flow::Next, next))
}

fn exec_pwm(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let (pin, next) = eval(interp, bytes, pos, host)?;
    let next = expect(bytes, next, b',')?;
    let (value, next) = eval(interp, bytes, next, host)?;
    host.gpio.pwm_set(pin as u32, value as u32)?;
    Ok((Flow::Next, next))
}

// ---- Assignment / compound-assignment / postfix ----------------------------

enum LValue {
    Var(u8),
    Array(Int),
}

/// A compound-assignment operator (spec §4.6): arithmetic, bitwise, or
/// shift, each paired with a trailing `=`.
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Or,
    And,
    Xor,
    Shl,
    Shr,
}

fn execute_assignment(
    interp: &mut Interpreter,
    bytes: &[u8],
    pos: usize,
    host: &mut Host<'_>,
) -> Result<(Flow, usize), RuntimeError> {
    let mut pos = pos;
    let lvalue = match bytes.get(pos).copied() {
        Some(b) if b.is_ascii_uppercase() => {
            pos += 1;
            LValue::Var(b - b'A')
        }
        Some(opcode::ARRAY_MARK) => {
            pos += 1;
            pos = expect(bytes, pos, b'[')?;
            let (index, next) = eval(interp, bytes, pos, host)?;
            pos = next;
            pos = expect(bytes, pos, b']')?;
            LValue::Array(index)
        }
        _ => return Err(RuntimeError::Syntax),
    };

    let current = read_lvalue(interp, &lvalue)?;

    // Postfix `++`/`--`: same byte repeated, no right-hand side.
    if let Some(&b) = bytes.get(pos) {
        if (b == b'+' || b == b'-') && bytes.get(pos + 1) == Some(&b) {
            let delta: Int = if b == b'+' { 1 } else { -1 };
            write_lvalue(interp, &lvalue, current.wrapping_add(delta))?;
            return Ok((Flow::Next, pos + 2));
        }
    }

    let (op, pos) = match bytes.get(pos).copied() {
        Some(b'=') => (None, pos + 1),
        Some(b'<') if bytes.get(pos + 1) == Some(&b'<') && bytes.get(pos + 2) == Some(&b'=') => {
            (Some(Op::Shl), pos + 3)
        }
        Some(b'>') if bytes.get(pos + 1) == Some(&b'>') && bytes.get(pos + 2) == Some(&b'=') => {
            (Some(Op::Shr), pos + 3)
        }
        Some(b @ (b'+' | b'-' | b'*' | b'/' | b'%' | b'|' | b'&' | b'^')) if bytes.get(pos + 1) == Some(&b'=') => {
            let op = match b {
                b'+' => Op::Add,
                b'-' => Op::Sub,
                b'*' => Op::Mul,
                b'/' => Op::Div,
                b'%' => Op::Rem,
                b'|' => Op::Or,
                b'&' => Op::And,
                _ => Op::Xor,
            };
            (Some(op), pos + 2)
        }
        _ => return Err(RuntimeError::Syntax),
    };

    let (rhs, next) = eval(interp, bytes, pos, host)?;
    let value = match op {
        None => rhs,
        Some(Op::Add) => current.wrapping_add(rhs),
        Some(Op::Sub) => current.wrapping_sub(rhs),
        Some(Op::Mul) => current.wrapping_mul(rhs),
        Some(Op::Div) => {
            if rhs == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            current.wrapping_div(rhs)
        }
        Some(Op::Rem) => {
            if rhs == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            current.wrapping_rem(rhs)
        }
        Some(Op::Or) => current | rhs,
        Some(Op::And) => current & rhs,
        Some(Op::Xor) => current ^ rhs,
        Some(Op::Shl) => current.wrapping_shl(rhs as u32),
        Some(Op::Shr) => current.wrapping_shr(rhs as u32),
    };
    write_lvalue(interp, &lvalue, value)?;
    Ok((Flow::Next, next))
}

fn read_lvalue(interp: &Interpreter, lvalue: &LValue) -> Result<Int, RuntimeError> {
    match *lvalue {
        LValue::Var(idx) => Ok(interp.registers[idx as usize]),
        LValue::Array(idx) => {
            let i = idx as isize;
            if i < 0 || i as usize >= interp.array.len() {
                return Err(RuntimeError::ArrayIndexOver);
            }
            Ok(interp.array[i as usize])
        }
    }
}

fn write_lvalue(interp: &mut Interpreter, lvalue: &LValue, value: Int) -> Result<(), RuntimeError> {
    match *lvalue {
        LValue::Var(idx) => interp.registers[idx as usize] = value,
        LValue::Array(idx) => {
            let i = idx as isize;
            if i < 0 || i as usize >= interp.array.len() {
                return Err(RuntimeError::ArrayIndexOver);
            }
            interp.array[i as usize] = value;
        }
    }
    Ok(())
}

// ---- LIST -------------------------------------------------------------------

/// Best-effort decompile of the stored program back to source text. A
/// leading label renders the same way any other leading literal does —
/// labels aren't a distinct byte form, just an ordinary decimal literal
/// sitting first on the line (spec §4.3 step 2).
fn list_program(program: &ProgramStore, console: &mut dyn crate::host::Console) {
    for (_, line) in program.lines() {
        let bytes = line.bytes;
        let mut pos = 0;
        while pos < bytes.len() {
            let b = bytes[pos];
            if opcode::is_inline_digit(b) {
                console.put_char(b);
                pos += 1;
            } else if opcode::is_value_tag(b) {
                let (hex, width) = opcode::decode_value_tag(b);
                if let Some(v) = value::decode_literal(&bytes[pos + 1..], width, hex) {
                    let text =
                        if hex { format!("0x{:X}", value::unsigned_bits(v)) } else { format!("{}", v) };
                    for c in text.bytes() {
                        console.put_char(c);
                    }
                }
                pos += 1 + width as usize;
            } else if let Some(kw) = Keyword::from_opcode(b) {
                for c in kw.name().bytes() {
                    console.put_char(c);
                }
                console.put_char(b' ');
                pos += 1;
            } else {
                console.put_char(b);
                pos += 1;
            }
        }
        console.put_char(b'\r');
        console.put_char(b'\n');
    }
}

#[cfg(test)]
mod tests {
    use super::super::executor::{Interpreter, Mode};
    use crate::config::Config;
    use crate::host::mock::{MockClock, MockConsole, MockGpio, MockPersistentStore, MockRandom};
    use crate::host::SystemControl;
    use crate::Host;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct NoopSystem;
    impl SystemControl for NoopSystem {
        fn reset(&mut self) -> ! {
            panic!("reset called in test");
        }
    }

    /// Runs `program` to completion (or up to `max_steps`), capturing every
    /// byte written to the console. The program is entered starting at
    /// label `100`.
    fn run_program(program: &[&str], max_steps: usize) -> String {
        let mut interp = Interpreter::new(Config::default());
        let output = Rc::new(RefCell::new(Vec::new()));
        let out = output.clone();

        let mut console = MockConsole::new();
        console.expect_get_char().returning(|| None);
        console.expect_put_char().returning(move |b| out.borrow_mut().push(b));
        let clock = MockClock::new();
        let mut random = MockRandom::new();
        let mut gpio = MockGpio::new();
        let mut store = MockPersistentStore::new();
        let mut system = NoopSystem;

        let mut host = Host {
            console: &mut console,
            clock: &clock,
            random: &mut random,
            gpio: &mut gpio,
            store: &mut store,
            system: &mut system,
        };

        interp.submit_line("PROG", &mut host).unwrap();
        for line in program {
            interp.submit_line(line, &mut host).unwrap();
        }
        interp.submit_line("#", &mut host).unwrap();
        interp.submit_line("GOTO 100", &mut host).unwrap();

        for _ in 0..max_steps {
            if interp.mode() != Mode::Run {
                break;
            }
            if interp.run_step(&mut host).is_err() {
                break;
            }
        }

        String::from_utf8(output.borrow().clone()).unwrap()
    }

    #[test]
    fn print_literal_and_expression() {
        let out = run_program(&["100 PRINT 1+2"], 10);
        assert_eq!(out, "3\r\n");
    }

    #[test]
    fn colon_chained_statements_run_in_order_on_one_line() {
        // Scenario: A=2:FOR I=1 TO 3:? I*A:NEXT
        let out = run_program(&["100 A=2:FOR I=1 TO 3:? I*A:NEXT"], 50);
        assert_eq!(out, "2\r\n4\r\n6\r\n");
    }

    #[test]
    fn do_loop_with_colon_chained_if_exit() {
        // Scenario: DO:A++:IF A=3 THEN EXIT ENDIF:LOOP
        let out = run_program(&["100 DO:A++:IF A=3 THEN EXIT ENDIF:LOOP", "? A"], 80);
        assert_eq!(out, "3\r\n");
    }

    #[test]
    fn for_next_sums_a_range() {
        let out = run_program(&["100 S=0", "FOR I=1 TO 5", "S=S+I", "NEXT", "PRINT S"], 50);
        assert_eq!(out, "15\r\n");
    }

    #[test]
    fn if_else_picks_the_false_branch() {
        let out = run_program(&["100 IF 0 THEN", "PRINT 1", "ELSE", "PRINT 2", "ENDIF"], 20);
        assert_eq!(out, "2\r\n");
    }

    #[test]
    fn if_true_with_trailing_value_is_an_implicit_goto() {
        let out = run_program(&["100 IF 1 THEN 200", "PRINT 1", "STOP", "200 PRINT 2"], 20);
        assert_eq!(out, "2\r\n");
    }

    #[test]
    fn gosub_return_round_trips() {
        let out = run_program(&["100 GOSUB 200", "PRINT 9", "STOP", "200 PRINT 1", "RETURN"], 20);
        assert_eq!(out, "1\r\n9\r\n");
    }

    #[test]
    fn array_assignment_and_read_back() {
        let out = run_program(&["100 @[2]=7", "PRINT @[2]"], 10);
        assert_eq!(out, "7\r\n");
    }

    #[test]
    fn bitwise_and_shift_compound_assignment() {
        let out = run_program(&["100 A=6", "A|=1", "A<<=2", "PRINT A"], 10);
        assert_eq!(out, "28\r\n");
    }

    #[test]
    fn division_by_zero_reports_and_returns_to_repl() {
        let mut interp = Interpreter::new(Config::default());
        let mut console = MockConsole::new();
        console.expect_get_char().returning(|| None);
        console.expect_put_char().returning(|_| ());
        let clock = MockClock::new();
        let mut random = MockRandom::new();
        let mut gpio = MockGpio::new();
        let mut store = MockPersistentStore::new();
        let mut system = NoopSystem;
        let mut host = Host {
            console: &mut console,
            clock: &clock,
            random: &mut random,
            gpio: &mut gpio,
            store: &mut store,
            system: &mut system,
        };

        let err = interp.submit_line("PRINT 1/0", &mut host).unwrap_err();
        assert_eq!(err, crate::error::RuntimeError::DivisionByZero);
        assert_eq!(interp.mode(), Mode::Repl);
    }

    #[test]
    fn data_read_restore_round_trips() {
        let out = run_program(
            &["100 DATA 10,20", "READ X", "READ Y", "PRINT X+Y", "RESTORE", "READ X", "PRINT X"],
            30,
        );
        assert_eq!(out, "30\r\n10\r\n");
    }

    #[test]
    fn data_statement_does_not_swallow_the_statement_after_it() {
        let out = run_program(&["100 DATA 1,2:PRINT 9"], 10);
        assert_eq!(out, "9\r\n");
    }

    #[test]
    fn dec_width_inserts_a_decimal_point_past_100() {
        let out = run_program(&["100 PRINT DEC(1234,205)"], 10);
        assert_eq!(out, "  12.34\r\n");
    }

    #[test]
    fn hex_width_never_signs_a_negative_value() {
        let out = run_program(&["100 PRINT HEX(-1,4)"], 10);
        assert_eq!(out, "FFFF\r\n");
    }

    #[test]
    fn chr_prints_a_raw_byte() {
        let out = run_program(&["100 PRINT CHR(65)"], 10);
        assert_eq!(out, "A\r\n");
    }

    #[test]
    fn print_string_expands_escapes() {
        let out = run_program(&[r#"100 PRINT "a\tb\x41""#], 10);
        assert_eq!(out, "a\tbA\r\n");
    }
}
