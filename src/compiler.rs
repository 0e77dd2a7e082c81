//! The single-pass compiler
//!
//! There is no AST. The parser walks the token buffer with a Pratt
//! precedence climber and emits instructions straight into the chunk,
//! tracking lexical scopes, local slots and pending jump patches as it goes.

use crate::chunk::BytecodeChunk;
use crate::error::CompiletimeError;
use crate::func::ScriptFunction;
use crate::op::Op;
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::value::Value;

pub struct Compiler;

impl Compiler {
    /// Scan and parse a script into the chunk
    pub fn compile(source: &str, chunk: &mut BytecodeChunk) -> Result<(), CompiletimeError> {
        let tokens = Scanner::new(source).scan()?;
        Parser::new(tokens, chunk).parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // ()
    Primary,
}

impl Precedence {
    /// One level tighter, used for the right operand of binary operators
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'chk> = fn(&mut Parser<'src, 'chk>, bool) -> Result<(), CompiletimeError>;

struct ParseRule<'src, 'chk> {
    prefix: Option<ParseFn<'src, 'chk>>,
    infix: Option<ParseFn<'src, 'chk>>,
    precedence: Precedence,
}

/// The prefix/infix dispatch triple for a token kind
fn rule_for<'src, 'chk>(kind: TokenKind) -> ParseRule<'src, 'chk> {
    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'chk>>,
        Option<ParseFn<'src, 'chk>>,
        Precedence,
    ) = match kind {
        TokenKind::LParen => (
            Some(Parser::grouping_expr),
            Some(Parser::call_expr),
            Precedence::Call,
        ),
        TokenKind::Minus => (
            Some(Parser::unary_expr),
            Some(Parser::binary_expr),
            Precedence::Term,
        ),
        TokenKind::Plus => (None, Some(Parser::binary_expr), Precedence::Term),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => {
            (None, Some(Parser::binary_expr), Precedence::Factor)
        }
        TokenKind::Bang => (Some(Parser::unary_expr), None, Precedence::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            (None, Some(Parser::binary_expr), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => (None, Some(Parser::binary_expr), Precedence::Comparison),
        TokenKind::Identifier => (Some(Parser::make_variable), None, Precedence::None),
        TokenKind::String => (Some(Parser::make_string), None, Precedence::None),
        TokenKind::Number => (Some(Parser::make_number), None, Precedence::None),
        TokenKind::And => (None, Some(Parser::and_expr), Precedence::And),
        TokenKind::Or => (None, Some(Parser::or_expr), Precedence::Or),
        TokenKind::True | TokenKind::False | TokenKind::Nil => {
            (Some(Parser::literal_expr), None, Precedence::None)
        }
        _ => (None, None, Precedence::None),
    };

    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

/// A declared local variable
///
/// The index in the parser's locals stack doubles as the runtime stack slot
/// relative to the owning call frame's base.
#[derive(Debug)]
struct Local<'src> {
    name: Token<'src>,
    depth: usize,
    initialized: bool,
}

enum VarLookup {
    Local(usize),
    Global,
}

pub struct Parser<'src, 'chk> {
    tokens: Vec<Token<'src>>,
    cursor: usize,
    chunk: &'chk mut BytecodeChunk,
    locals: Vec<Local<'src>>,
    /// 0 is the global namespace, anything deeper declares locals
    scope_depth: usize,
    in_loop: bool,
    /// Instruction the innermost loop's `continue` jumps back to
    continue_target: usize,
    /// Scope depth at the innermost loop entry
    loop_depth: usize,
    /// Forward jumps to patch once the innermost loop ends
    breaks: Vec<usize>,
    in_function: bool,
    /// First locals-stack index owned by the function being compiled
    fn_locals_base: usize,
}

impl<'src, 'chk> Parser<'src, 'chk> {
    pub fn new(tokens: Vec<Token<'src>>, chunk: &'chk mut BytecodeChunk) -> Self {
        Parser {
            tokens,
            cursor: 0,
            chunk,
            locals: Vec::new(),
            scope_depth: 0,
            in_loop: false,
            continue_target: 0,
            loop_depth: 0,
            breaks: Vec::new(),
            in_function: false,
            fn_locals_base: 0,
        }
    }

    /// Parse declarations until end of file
    pub fn parse(mut self) -> Result<(), CompiletimeError> {
        while !self.check(TokenKind::Eof) {
            self.declaration()?;
        }
        self.emit(Op::End);
        Ok(())
    }

    fn current(&self) -> &Token<'src> {
        &self.tokens[self.cursor]
    }

    fn previous(&self) -> &Token<'src> {
        &self.tokens[self.cursor - 1]
    }

    fn advance(&mut self) {
        if self.current().kind != TokenKind::Eof {
            self.cursor += 1;
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn advance_if_matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<(), CompiletimeError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_at(self.current(), message))
        }
    }

    fn error_at(&self, token: &Token<'src>, message: impl Into<String>) -> CompiletimeError {
        CompiletimeError::new(token.line, token.column, message)
    }

    fn emit(&mut self, op: Op) {
        let line = self.tokens[self.cursor.saturating_sub(1)].line;
        self.chunk.write(op, line);
    }

    /// Emit a jump with a placeholder operand, returning its location
    fn emit_jump(&mut self, op: Op) -> usize {
        let location = self.chunk.instruction_count();
        self.emit(op);
        location
    }

    /// Point a previously emitted forward jump at the next instruction
    fn patch_jump(&mut self, jump_loc: usize) {
        let offset = self.chunk.instruction_count() - jump_loc;
        self.chunk.patch_jump(jump_loc, offset);
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Leave a scope, discarding its locals at runtime with a POP_N
    fn end_scope(&mut self) {
        self.scope_depth -= 1;

        let mut count = 0;
        while matches!(self.locals.last(), Some(l) if l.depth > self.scope_depth) {
            self.locals.pop();
            count += 1;
        }

        self.emit(Op::PopN(count));
    }

    fn scoped_block(&mut self) -> Result<(), CompiletimeError> {
        self.begin_scope();
        self.block_stmt()?;
        self.end_scope();
        Ok(())
    }

    /// Run `f` as the body of a loop, returning the break patch locations
    fn wrap_loop<F>(
        &mut self,
        continue_target: usize,
        f: F,
    ) -> Result<Vec<usize>, CompiletimeError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompiletimeError>,
    {
        let was_in_loop = std::mem::replace(&mut self.in_loop, true);
        let old_target = std::mem::replace(&mut self.continue_target, continue_target);
        let old_depth = std::mem::replace(&mut self.loop_depth, self.scope_depth);
        let old_breaks = std::mem::take(&mut self.breaks);

        let res = f(self);

        self.in_loop = was_in_loop;
        self.continue_target = old_target;
        self.loop_depth = old_depth;
        let breaks = std::mem::replace(&mut self.breaks, old_breaks);

        res.map(|_| breaks)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<(), CompiletimeError> {
        self.advance();
        let prefix_rule = rule_for(self.previous().kind)
            .prefix
            .ok_or_else(|| self.error_at(self.previous(), "expected an expression"))?;

        let can_assign = precedence <= Precedence::Assignment;
        prefix_rule(self, can_assign)?;

        while precedence <= rule_for(self.current().kind).precedence {
            self.advance();
            let infix_rule = rule_for(self.previous().kind)
                .infix
                .ok_or_else(|| self.error_at(self.previous(), "expected an expression"))?;
            infix_rule(self, can_assign)?;
        }

        if can_assign && self.advance_if_matches(TokenKind::Equal) {
            return Err(self.error_at(self.previous(), "invalid assignment target"));
        }

        Ok(())
    }

    fn expression(&mut self) -> Result<(), CompiletimeError> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn grouping_expr(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        self.expression()?;
        self.consume(TokenKind::RParen, "expect ')' after expression")
    }

    fn unary_expr(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        let operator = self.previous().kind;

        self.parse_precedence(Precedence::Unary)?;

        match operator {
            TokenKind::Bang => self.emit(Op::Not),
            TokenKind::Minus => self.emit(Op::Negate),
            _ => unreachable!("invalid unary operator"),
        }
        Ok(())
    }

    fn binary_expr(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        let operator = self.previous().kind;

        let precedence = rule_for(operator).precedence;
        self.parse_precedence(precedence.next())?;

        let op = match operator {
            TokenKind::EqualEqual => Op::Equal,
            TokenKind::BangEqual => Op::NotEqual,
            TokenKind::Greater => Op::Greater,
            TokenKind::GreaterEqual => Op::GreaterEqual,
            TokenKind::Less => Op::Less,
            TokenKind::LessEqual => Op::LessEqual,
            TokenKind::Plus => Op::Add,
            TokenKind::Minus => Op::Sub,
            TokenKind::Star => Op::Mul,
            TokenKind::Slash => Op::Div,
            TokenKind::Percent => Op::Mod,
            _ => unreachable!("invalid binary operator"),
        };
        self.emit(op);
        Ok(())
    }

    fn literal_expr(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        match self.previous().kind {
            TokenKind::Nil => self.emit(Op::Nil),
            TokenKind::True => self.emit(Op::True),
            TokenKind::False => self.emit(Op::False),
            _ => unreachable!("invalid literal kind"),
        }
        Ok(())
    }

    fn and_expr(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        let end_jump = self.emit_jump(Op::And(0));
        self.parse_precedence(Precedence::And)?;
        self.patch_jump(end_jump);
        Ok(())
    }

    fn or_expr(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        let end_jump = self.emit_jump(Op::Or(0));
        self.parse_precedence(Precedence::Or)?;
        self.patch_jump(end_jump);
        Ok(())
    }

    fn call_expr(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        let arg_count = self.parse_arg_list()?;
        self.emit(Op::Call(arg_count));
        Ok(())
    }

    fn parse_arg_list(&mut self) -> Result<usize, CompiletimeError> {
        let mut count = 0;
        if !self.check(TokenKind::RParen) {
            loop {
                self.expression()?;
                count += 1;
                if !self.advance_if_matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expect ')' after arguments")?;
        Ok(count)
    }

    fn make_number(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        let token = self.previous().clone();
        let number: f64 = token
            .lexeme
            .parse()
            .map_err(|_| self.error_at(&token, "unparsable number"))?;
        self.chunk.write_constant(Value::Number(number), token.line);
        Ok(())
    }

    fn make_string(&mut self, _can_assign: bool) -> Result<(), CompiletimeError> {
        let token = self.previous().clone();
        self.chunk
            .write_constant(Value::from(token.lexeme), token.line);
        Ok(())
    }

    fn make_variable(&mut self, can_assign: bool) -> Result<(), CompiletimeError> {
        self.named_variable(can_assign)
    }

    fn named_variable(&mut self, can_assign: bool) -> Result<(), CompiletimeError> {
        let name = self.previous().clone();

        let (get, set) = match self.resolve_local(&name)? {
            VarLookup::Local(slot) => (Op::LookupLocal(slot), Op::AssignLocal(slot)),
            VarLookup::Global => {
                let index = self.identifier_constant(&name);
                (Op::LookupGlobal(index), Op::AssignGlobal(index))
            }
        };

        if can_assign && self.advance_if_matches(TokenKind::Equal) {
            self.expression()?;
            self.emit(set);
        } else {
            self.emit(get);
        }
        Ok(())
    }

    /// Consume a variable name and declare it, returning the name's constant
    /// index when at global scope
    fn parse_variable(&mut self, err_msg: &str) -> Result<usize, CompiletimeError> {
        self.consume(TokenKind::Identifier, err_msg)?;
        self.declare_variable()?;
        if self.scope_depth > 0 {
            Ok(0)
        } else {
            let name = self.previous().clone();
            Ok(self.identifier_constant(&name))
        }
    }

    /// Define the just-declared variable
    ///
    /// Globals get a DEFINE_GLOBAL; a local simply becomes readable, its
    /// value already sits in its slot.
    fn define_variable(&mut self, global: usize) {
        if self.scope_depth == 0 {
            self.emit(Op::DefineGlobal(global));
        } else {
            self.mark_initialized();
        }
    }

    fn mark_initialized(&mut self) {
        if let Some(local) = self.locals.last_mut() {
            local.initialized = true;
        }
    }

    fn declare_variable(&mut self) -> Result<(), CompiletimeError> {
        if self.scope_depth == 0 {
            return Ok(());
        }

        let name = self.previous().clone();
        for local in self.locals.iter().rev() {
            if local.initialized && local.depth < self.scope_depth {
                break;
            }
            if local.name.lexeme == name.lexeme {
                return Err(self.error_at(
                    &name,
                    format!(
                        "a variable named '{}' is already declared in this scope",
                        name.lexeme
                    ),
                ));
            }
        }

        self.add_local(name);
        Ok(())
    }

    fn identifier_constant(&mut self, name: &Token<'src>) -> usize {
        match self.chunk.find_ident(name.lexeme) {
            Some(index) => index,
            None => self.chunk.add_ident(name.lexeme),
        }
    }

    fn add_local(&mut self, name: Token<'src>) {
        self.locals.push(Local {
            name,
            depth: self.scope_depth,
            initialized: false,
        });
    }

    /// Find a name in the current function's locals, innermost first
    ///
    /// Anything declared outside the current function resolves as a global;
    /// there are no closures over enclosing locals.
    fn resolve_local(&self, name: &Token<'src>) -> Result<VarLookup, CompiletimeError> {
        for (index, local) in self
            .locals
            .iter()
            .enumerate()
            .skip(self.fn_locals_base)
            .rev()
        {
            if local.name.lexeme == name.lexeme {
                if !local.initialized {
                    return Err(
                        self.error_at(name, "cannot read a variable in its own initializer")
                    );
                }
                return Ok(VarLookup::Local(index - self.fn_locals_base));
            }
        }

        Ok(VarLookup::Global)
    }

    fn declaration(&mut self) -> Result<(), CompiletimeError> {
        if self.advance_if_matches(TokenKind::Let) {
            self.let_stmt()
        } else if self.advance_if_matches(TokenKind::Fn) {
            self.fn_stmt()
        } else {
            self.statement()
        }
    }

    fn statement(&mut self) -> Result<(), CompiletimeError> {
        if self.advance_if_matches(TokenKind::Print) {
            self.print_stmt()
        } else if self.advance_if_matches(TokenKind::If) {
            self.if_stmt()
        } else if self.advance_if_matches(TokenKind::While) {
            self.while_stmt()
        } else if self.advance_if_matches(TokenKind::For) {
            self.for_stmt()
        } else if self.advance_if_matches(TokenKind::Loop) {
            self.loop_stmt()
        } else if self.advance_if_matches(TokenKind::Match) {
            self.match_stmt()
        } else if self.advance_if_matches(TokenKind::Break) {
            self.break_stmt()
        } else if self.advance_if_matches(TokenKind::Continue) {
            self.continue_stmt()
        } else if self.advance_if_matches(TokenKind::Return) {
            self.return_stmt()
        } else if self.advance_if_matches(TokenKind::LBrace) {
            self.begin_scope();
            let res = self.block_stmt();
            self.end_scope();
            res
        } else {
            self.expression_stmt()
        }
    }

    fn print_stmt(&mut self) -> Result<(), CompiletimeError> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "expected ';' after value")?;
        self.emit(Op::Print);
        Ok(())
    }

    fn expression_stmt(&mut self) -> Result<(), CompiletimeError> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "expected ';' after expression")?;
        self.emit(Op::Pop);
        Ok(())
    }

    fn let_stmt(&mut self) -> Result<(), CompiletimeError> {
        let global = self.parse_variable("expect variable name")?;

        if self.advance_if_matches(TokenKind::Equal) {
            self.expression()?;
        } else {
            self.emit(Op::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "expect ';' after variable declaration",
        )?;

        self.define_variable(global);
        Ok(())
    }

    fn block_stmt(&mut self) -> Result<(), CompiletimeError> {
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.declaration()?;
        }

        self.consume(TokenKind::RBrace, "expect '}' after block")
    }

    fn if_stmt(&mut self) -> Result<(), CompiletimeError> {
        self.expression()?;
        self.consume(TokenKind::LBrace, "expect '{' after condition")?;

        let then_jump = self.emit_jump(Op::JumpIfFalse(0));
        self.emit(Op::Pop);
        self.begin_scope();
        self.block_stmt()?;
        self.end_scope();

        let else_jump = self.emit_jump(Op::Jump(0));
        self.patch_jump(then_jump);
        self.emit(Op::Pop);

        if self.advance_if_matches(TokenKind::Else) {
            self.statement()?;
        }

        self.patch_jump(else_jump);
        Ok(())
    }

    fn while_stmt(&mut self) -> Result<(), CompiletimeError> {
        let loop_start = self.chunk.instruction_count();

        self.expression()?;
        self.consume(TokenKind::LBrace, "expect '{' after condition")?;

        let exit_jump = self.emit_jump(Op::JumpIfFalse(0));
        self.emit(Op::Pop);

        let breaks = self.wrap_loop(loop_start, |p| p.scoped_block())?;

        self.emit(Op::Loop(self.chunk.instruction_count() - loop_start));

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);
        for jump in breaks {
            self.patch_jump(jump);
        }
        Ok(())
    }

    /// `for init; condition; increment { body }`
    ///
    /// The increment clause is emitted between the condition and the body:
    /// the body jumps back into it, and it loops back to the condition.
    /// `continue` targets the increment section.
    fn for_stmt(&mut self) -> Result<(), CompiletimeError> {
        self.begin_scope();

        if self.advance_if_matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.advance_if_matches(TokenKind::Let) {
            self.let_stmt()?;
        } else {
            self.expression_stmt()?;
        }

        let cond_start = self.chunk.instruction_count();
        if self.check(TokenKind::Semicolon) {
            self.emit(Op::True);
        } else {
            self.expression()?;
        }
        self.consume(TokenKind::Semicolon, "expect ';' after loop condition")?;

        let exit_jump = self.emit_jump(Op::JumpIfFalse(0));
        self.emit(Op::Pop);
        let body_jump = self.emit_jump(Op::Jump(0));

        let incr_start = self.chunk.instruction_count();
        if !self.check(TokenKind::LBrace) {
            self.expression()?;
            self.emit(Op::Pop);
        }
        self.emit(Op::Loop(self.chunk.instruction_count() - cond_start));

        self.patch_jump(body_jump);
        self.consume(TokenKind::LBrace, "expect '{' after for clauses")?;

        let breaks = self.wrap_loop(incr_start, |p| p.scoped_block())?;

        self.emit(Op::Loop(self.chunk.instruction_count() - incr_start));

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);
        for jump in breaks {
            self.patch_jump(jump);
        }

        self.end_scope();
        Ok(())
    }

    fn loop_stmt(&mut self) -> Result<(), CompiletimeError> {
        let loop_start = self.chunk.instruction_count();
        self.consume(TokenKind::LBrace, "expect '{' after loop")?;

        let breaks = self.wrap_loop(loop_start, |p| p.scoped_block())?;

        self.emit(Op::Loop(self.chunk.instruction_count() - loop_start));
        for jump in breaks {
            self.patch_jump(jump);
        }
        Ok(())
    }

    /// `match subject { value -> statement ... else -> statement }`
    ///
    /// The subject stays on the stack while CHECK compares each arm's value
    /// against it. It occupies a stack slot for the whole construct, so it
    /// is tracked as an unnamed local in its own scope: the scope exit pops
    /// it, and a `break` or `continue` inside an arm unwinds it like any
    /// other local instead of leaking it.
    fn match_stmt(&mut self) -> Result<(), CompiletimeError> {
        self.begin_scope();
        self.expression()?;
        self.add_subject_local();
        self.consume(TokenKind::LBrace, "expect '{' after match subject")?;

        let mut end_jumps = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.advance_if_matches(TokenKind::Else) {
                self.consume(TokenKind::Arrow, "expect '->' after else")?;
                self.statement()?;
                break;
            }

            self.expression()?;
            self.consume(TokenKind::Arrow, "expect '->' after match arm value")?;

            self.emit(Op::Check);
            let next_arm = self.emit_jump(Op::JumpIfFalse(0));
            self.emit(Op::Pop);
            self.statement()?;
            end_jumps.push(self.emit_jump(Op::Jump(0)));
            self.patch_jump(next_arm);
            self.emit(Op::Pop);
        }

        self.consume(TokenKind::RBrace, "expect '}' after match arms")?;
        for jump in end_jumps {
            self.patch_jump(jump);
        }
        self.end_scope();
        Ok(())
    }

    /// Claim the current top of the stack as an unnamed local
    ///
    /// The empty lexeme can never collide with a real identifier, so the
    /// slot stays unreachable from source while still being counted by
    /// scope exits and loop unwinding.
    fn add_subject_local(&mut self) {
        let name = Token {
            kind: TokenKind::Identifier,
            lexeme: "",
            line: self.previous().line,
            column: self.previous().column,
        };
        self.locals.push(Local {
            name,
            depth: self.scope_depth,
            initialized: true,
        });
    }

    fn break_stmt(&mut self) -> Result<(), CompiletimeError> {
        if !self.in_loop {
            return Err(self.error_at(self.previous(), "cannot break outside of a loop"));
        }
        self.consume(TokenKind::Semicolon, "expect ';' after break")?;

        let count = self.locals_deeper_than(self.loop_depth);
        self.emit(Op::PopN(count));
        let jump = self.emit_jump(Op::Jump(0));
        self.breaks.push(jump);
        Ok(())
    }

    fn continue_stmt(&mut self) -> Result<(), CompiletimeError> {
        if !self.in_loop {
            return Err(self.error_at(self.previous(), "cannot continue outside of a loop"));
        }
        self.consume(TokenKind::Semicolon, "expect ';' after continue")?;

        let count = self.locals_deeper_than(self.loop_depth);
        self.emit(Op::PopN(count));
        self.emit(Op::Loop(
            self.chunk.instruction_count() - self.continue_target,
        ));
        Ok(())
    }

    /// How many locals sit above the given scope depth, without discarding
    /// them from the compile-time stack
    fn locals_deeper_than(&self, depth: usize) -> usize {
        self.locals
            .iter()
            .rev()
            .take_while(|l| l.depth > depth)
            .count()
    }

    fn return_stmt(&mut self) -> Result<(), CompiletimeError> {
        if !self.in_function {
            return Err(self.error_at(self.previous(), "cannot return from top-level code"));
        }

        if self.advance_if_matches(TokenKind::Semicolon) {
            self.emit(Op::Nil);
        } else {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "expect ';' after return value")?;
        }
        self.emit(Op::Return);
        Ok(())
    }

    /// `fn name(params) { body }`
    ///
    /// The body is compiled inline behind an unconditional jump; the
    /// function value records its entry offset and lands in the constant
    /// pool once the body is closed.
    fn fn_stmt(&mut self) -> Result<(), CompiletimeError> {
        let global = self.parse_variable("expect function name")?;
        let name = self.previous().lexeme.to_string();

        let jump_over = self.emit_jump(Op::Jump(0));
        let entry = self.chunk.instruction_count();

        let was_in_function = std::mem::replace(&mut self.in_function, true);
        let old_base = std::mem::replace(&mut self.fn_locals_base, self.locals.len());
        let was_in_loop = std::mem::replace(&mut self.in_loop, false);

        self.begin_scope();
        self.consume(TokenKind::LParen, "expect '(' after function name")?;
        let mut arity = 0;
        if !self.check(TokenKind::RParen) {
            loop {
                self.consume(TokenKind::Identifier, "expect parameter name")?;
                self.declare_variable()?;
                self.mark_initialized();
                arity += 1;
                if !self.advance_if_matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expect ')' after parameters")?;
        self.consume(TokenKind::LBrace, "expect '{' before function body")?;
        self.block_stmt()?;

        // bodies that fall off the end return nil; RETURN unwinds the
        // locals, so no POP_N here
        self.emit(Op::Nil);
        self.emit(Op::Return);

        self.scope_depth -= 1;
        self.locals.truncate(self.fn_locals_base);
        self.in_function = was_in_function;
        self.fn_locals_base = old_base;
        self.in_loop = was_in_loop;

        self.patch_jump(jump_over);

        let function = ScriptFunction::new(name, arity, entry);
        let index = self.chunk.insert_constant(Value::Function(function));
        self.emit(Op::Constant(index));
        self.define_variable(global);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::chunk::BytecodeChunk;
    use crate::op::Op;
    use crate::value::Value;

    use super::Compiler;

    fn compile(src: &str) -> BytecodeChunk {
        let mut chunk = BytecodeChunk::new();
        Compiler::compile(src, &mut chunk).unwrap();
        chunk
    }

    fn compile_err(src: &str) -> String {
        let mut chunk = BytecodeChunk::new();
        Compiler::compile(src, &mut chunk).unwrap_err().message
    }

    fn ops(chunk: &BytecodeChunk) -> Vec<Op> {
        (0..chunk.instruction_count())
            .map(|i| chunk.op_at(i).unwrap())
            .collect()
    }

    #[test]
    fn arithmetic_expression() {
        let chunk = compile("print 1 + 2 * 3;");

        assert_eq!(
            ops(&chunk),
            vec![
                Op::Constant(0),
                Op::Constant(1),
                Op::Constant(2),
                Op::Mul,
                Op::Add,
                Op::Print,
                Op::End,
            ]
        );
    }

    #[test]
    fn global_declaration() {
        let chunk = compile("let x = 1;");

        assert_eq!(
            ops(&chunk),
            vec![Op::Constant(1), Op::DefineGlobal(0), Op::End]
        );
        assert_eq!(chunk.constant_at(0), Some(&Value::from("x")));
        assert_eq!(chunk.constant_at(1), Some(&Value::Number(1.)));
    }

    #[test]
    fn bare_let_defaults_to_nil() {
        let chunk = compile("let x;");
        assert_eq!(ops(&chunk), vec![Op::Nil, Op::DefineGlobal(0), Op::End]);
    }

    #[test]
    fn locals_live_on_the_stack() {
        let chunk = compile("{ let a = 1; print a; }");

        assert_eq!(
            ops(&chunk),
            vec![
                Op::Constant(0),
                Op::LookupLocal(0),
                Op::Print,
                Op::PopN(1),
                Op::End,
            ]
        );
    }

    #[test]
    fn assignment_emits_the_value_first() {
        let chunk = compile("let x = 1; x = 2;");

        assert_eq!(
            ops(&chunk),
            vec![
                Op::Constant(1),
                Op::DefineGlobal(0),
                Op::Constant(2),
                Op::AssignGlobal(0),
                Op::Pop,
                Op::End,
            ]
        );
    }

    #[test]
    fn identifiers_share_one_constant() {
        let chunk = compile("let x = 1; x = 2; print x;");

        let x_constants = (0..10)
            .filter_map(|i| chunk.constant_at(i))
            .filter(|v| **v == Value::from("x"))
            .count();
        assert_eq!(x_constants, 1);
    }

    #[test]
    fn if_else_emission() {
        let chunk = compile("if true { print 1; } else { print 2; }");

        assert_eq!(
            ops(&chunk),
            vec![
                Op::True,
                Op::JumpIfFalse(6),
                Op::Pop,
                Op::Constant(0),
                Op::Print,
                Op::PopN(0),
                Op::Jump(5),
                Op::Pop,
                Op::Constant(1),
                Op::Print,
                Op::PopN(0),
                Op::End,
            ]
        );
    }

    #[test]
    fn and_leaves_the_operand_in_place() {
        let chunk = compile("print true and false;");

        assert_eq!(
            ops(&chunk),
            vec![Op::True, Op::And(2), Op::False, Op::Print, Op::End]
        );
    }

    #[test]
    fn or_leaves_the_operand_in_place() {
        let chunk = compile("print false or true;");

        assert_eq!(
            ops(&chunk),
            vec![Op::False, Op::Or(2), Op::True, Op::Print, Op::End]
        );
    }

    #[test]
    fn while_loops_back_to_the_condition() {
        let chunk = compile("let i = 0; while i < 3 { i = i + 1; }");

        assert_eq!(
            ops(&chunk),
            vec![
                Op::Constant(1),      // 0: 0
                Op::DefineGlobal(0),  // 1: i
                Op::LookupGlobal(0),  // 2: loop start
                Op::Constant(2),      // 3: 3
                Op::Less,             // 4
                Op::JumpIfFalse(9),   // 5 -> 14
                Op::Pop,              // 6
                Op::LookupGlobal(0),  // 7
                Op::Constant(3),      // 8: 1
                Op::Add,              // 9
                Op::AssignGlobal(0),  // 10
                Op::Pop,              // 11
                Op::PopN(0),          // 12: block scope end
                Op::Loop(11),         // 13 -> 2
                Op::Pop,              // 14
                Op::End,              // 15
            ]
        );
    }

    #[test]
    fn function_body_is_jumped_over() {
        let chunk = compile("fn add(a, b) { return a + b; } print add(2, 3);");

        assert_eq!(
            ops(&chunk),
            vec![
                Op::Jump(7),         // 0 -> 7
                Op::LookupLocal(0),  // 1: a
                Op::LookupLocal(1),  // 2: b
                Op::Add,             // 3
                Op::Return,          // 4
                Op::Nil,             // 5: implicit return
                Op::Return,          // 6
                Op::Constant(1),     // 7: <fn add>
                Op::DefineGlobal(0), // 8
                Op::LookupGlobal(0), // 9
                Op::Constant(2),     // 10: 2
                Op::Constant(3),     // 11: 3
                Op::Call(2),         // 12
                Op::Print,           // 13
                Op::End,             // 14
            ]
        );

        let function = chunk.constant_at(1).and_then(|v| v.as_function()).unwrap();
        assert_eq!(function.name(), "add");
        assert_eq!(function.arity(), 2);
    }

    #[test]
    fn jump_operands_stay_in_range() {
        let sources = [
            "if 1 < 2 { print 1; }",
            "if true and false { print 1; } else { print 2; }",
            "let i = 0; while i < 10 { if i % 2 == 0 { print i; } i = i + 1; }",
            "for let i = 0; i < 3; i = i + 1 { print i; }",
            "let i = 0; loop { i = i + 1; if i == 3 { break; } continue; }",
            "match 2 { 1 -> print \"one\"; 2 -> print \"two\"; else -> print \"other\"; }",
            "while true { match 1 { 1 -> { break; } } }",
            "fn fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); } print fib(10);",
        ];

        for source in sources {
            let chunk = compile(source);
            let count = chunk.instruction_count();
            for index in 0..count {
                let op = chunk.op_at(index).unwrap();
                if let Some(distance) = op.jump_operand() {
                    if let Op::Loop(_) = op {
                        assert!(distance <= index, "{}: LOOP at {} out of range", source, index);
                    } else {
                        assert!(
                            index + distance <= count,
                            "{}: jump at {} out of range",
                            source,
                            index
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn break_in_a_match_arm_pops_the_subject() {
        let chunk = compile("while true { match 1 { 1 -> break; } }");

        assert_eq!(
            ops(&chunk),
            vec![
                Op::True,            // 0: condition
                Op::JumpIfFalse(14), // 1 -> 15
                Op::Pop,             // 2
                Op::Constant(0),     // 3: subject
                Op::Constant(1),     // 4: arm value
                Op::Check,           // 5
                Op::JumpIfFalse(5),  // 6 -> 11
                Op::Pop,             // 7: check result
                Op::PopN(1),         // 8: break unwinds the subject
                Op::Jump(7),         // 9 -> 16, past the loop
                Op::Jump(2),         // 10 -> 12, arm done
                Op::Pop,             // 11: check result on the false path
                Op::PopN(1),         // 12: subject at scope exit
                Op::PopN(0),         // 13: body scope
                Op::Loop(14),        // 14 -> 0
                Op::Pop,             // 15: condition
                Op::End,             // 16
            ]
        );
    }

    #[test]
    fn reading_a_variable_in_its_own_initializer_fails() {
        let message = compile_err("{ let x = x; }");
        assert_eq!(message, "cannot read a variable in its own initializer");
    }

    #[test]
    fn duplicate_declaration_in_scope_fails() {
        let message = compile_err("{ let a = 1; let a = 2; }");
        assert_eq!(message, "a variable named 'a' is already declared in this scope");
    }

    #[test]
    fn shadowing_in_a_nested_scope_is_allowed() {
        let chunk = compile("{ let a = 1; { let a = 2; print a; } }");
        assert!(chunk.instruction_count() > 0);
    }

    #[test]
    fn invalid_assignment_target_fails() {
        let message = compile_err("1 = 2;");
        assert_eq!(message, "invalid assignment target");

        let message = compile_err("let a = 1; let b = 2; a + b = 3;");
        assert_eq!(message, "invalid assignment target");
    }

    #[test]
    fn missing_expression_fails() {
        let message = compile_err("print ;");
        assert_eq!(message, "expected an expression");
    }

    #[test]
    fn break_outside_a_loop_fails() {
        let message = compile_err("break;");
        assert_eq!(message, "cannot break outside of a loop");

        let message = compile_err("fn f() { break; } while true { f(); }");
        assert_eq!(message, "cannot break outside of a loop");
    }

    #[test]
    fn continue_outside_a_loop_fails() {
        let message = compile_err("continue;");
        assert_eq!(message, "cannot continue outside of a loop");
    }

    #[test]
    fn return_outside_a_function_fails() {
        let message = compile_err("return 1;");
        assert_eq!(message, "cannot return from top-level code");
    }

    #[test]
    fn errors_carry_the_source_position() {
        let mut chunk = BytecodeChunk::new();
        let err = Compiler::compile("let x =\n  ;", &mut chunk).unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert_eq!(err.message, "expected an expression");
    }
}
