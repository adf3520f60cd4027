//! The parser: token stream to AST.
//!
//! Recursive descent with an operator-precedence sub-parser for binary
//! expressions. Syntax errors are recorded through diagnostics and the parser
//! resumes at a recovery point (a comma, a matching close delimiter, or the
//! end of the line), so a single bad expression does not abort the module.

use smallvec::SmallVec;

use crate::{
    diagnostics::Diagnostics,
    graph::{Graph, NodeId, OpKind},
    intern::Interns,
    lexer::Lexer,
    object::AttrFlags,
    source::{BufferId, Location, SourceMap, TextBuffer},
    tokens::Token,
    types::{
        TYPE_ANY, TYPE_BOOL, TYPE_FLOAT, TYPE_GENERIC_DICT, TYPE_GENERIC_LIST, TYPE_INTEGER,
        TYPE_STRING, TypeRegistry,
    },
};

// Operator precedence levels, low to high.
const PREC_MAPSTO: u32 = 5;
const PREC_LOGICAL_OR: u32 = 5;
const PREC_LOGICAL_AND: u32 = 6;
const PREC_CONTAINS: u32 = 7;
const PREC_RELATIONAL: u32 = 10;
const PREC_ADDSUB: u32 = 30;
const PREC_MULDIV: u32 = 32;

/// Operator/operand pair stack for precedence parsing. The bottom entry
/// holds only an operand.
struct OperatorStack {
    stack: SmallVec<[(Option<NodeId>, OpKind, u32); 8]>,
}

impl OperatorStack {
    fn new(initial: NodeId) -> Self {
        let mut stack = SmallVec::new();
        stack.push((Some(initial), OpKind::Add, 0));
        Self { stack }
    }

    fn push_operand(&mut self, operand: NodeId) {
        let top = self.stack.last_mut().expect("operator stack underflow");
        debug_assert!(top.0.is_none());
        top.0 = Some(operand);
    }

    fn push_operator(&mut self, graph: &mut Graph, op: OpKind, prec: u32) {
        self.reduce(graph, prec);
        self.stack.push((None, op, prec));
    }

    fn reduce(&mut self, graph: &mut Graph, prec: u32) {
        while self.stack.len() > 1 {
            let &(operand, op, top_prec) = self.stack.last().expect("operator stack underflow");
            if top_prec < prec {
                break;
            }
            let rhs = operand.expect("operand missing during reduce");
            self.stack.pop();
            let lhs = self.stack.last().and_then(|e| e.0).expect("lhs missing");
            let loc = graph.loc(lhs).union(graph.loc(rhs));
            let combined = graph.oper(op, loc, [lhs, rhs]);
            self.stack.last_mut().expect("stack bottom").0 = Some(combined);
        }
    }

    fn finish(mut self, graph: &mut Graph) -> NodeId {
        self.reduce(graph, 0);
        self.stack[0].0.expect("empty operator stack")
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    pub graph: &'a mut Graph,
    pub interns: &'a mut Interns,
    pub types: &'a mut TypeRegistry,
    pub diags: &'a mut Diagnostics,
    pub sources: &'a SourceMap,
    token: Token,
    token_loc: Location,
    prev_loc: Location,
}

impl<'a> Parser<'a> {
    pub fn new(
        buffer_id: BufferId,
        buffer: &'a TextBuffer,
        graph: &'a mut Graph,
        interns: &'a mut Interns,
        types: &'a mut TypeRegistry,
        diags: &'a mut Diagnostics,
        sources: &'a SourceMap,
    ) -> Self {
        let mut lexer = Lexer::new(buffer_id, buffer);
        let token = lexer.next();
        let token_loc = lexer.token_location();
        Self {
            lexer,
            graph,
            interns,
            types,
            diags,
            sources,
            token,
            token_loc,
            prev_loc: token_loc,
        }
    }

    fn next(&mut self) {
        self.prev_loc = self.token_loc;
        self.token = self.lexer.next();
        self.token_loc = self.lexer.token_location();
    }

    fn match_tok(&mut self, tok: Token) -> bool {
        if self.token == tok {
            self.next();
            return true;
        }
        false
    }

    fn expected(&mut self, what: &str) {
        let found = self.token.name();
        self.diags.error(
            self.token_loc,
            self.sources,
            &format!("Expected {what}, not {found}"),
        );
    }

    fn lexer_error(&mut self) {
        let msg = self
            .lexer
            .error_code()
            .map_or("Lexical error", |e| e.message());
        self.diags.error(self.token_loc, self.sources, msg);
        // Step past the offending token so recovery can make progress.
        self.next();
    }

    fn match_ident(&mut self) -> Option<NodeId> {
        if self.token == Token::Ident {
            let text = self.lexer.token_text().into_owned();
            let name = self.interns.intern(&text);
            let loc = self.token_loc;
            self.next();
            return Some(self.graph.ident(loc, name));
        }
        None
    }

    // ------------------------------------------------------------------
    // Top-level entry points
    // ------------------------------------------------------------------

    /// Parses a whole module file, producing a `MakeModule` operator whose
    /// children are the module-level definitions. Stray close delimiters at
    /// the top level are reported and skipped.
    pub fn parse_module(&mut self) -> NodeId {
        let mut defs = Vec::new();
        loop {
            self.definition_list(&mut defs);
            if self.token == Token::End {
                break;
            }
            self.expected("definition");
            self.next();
            self.diags.recovered();
        }
        self.graph.oper(OpKind::MakeModule, Location::NONE, defs)
    }

    /// Parses a cached build-configuration file: a sequence of
    /// `project "<dir>" { ... }` entries.
    pub fn parse_projects(&mut self) -> Vec<NodeId> {
        let mut projects = Vec::new();
        loop {
            match self.token {
                Token::End => return projects,
                Token::Error => {
                    self.lexer_error();
                    return projects;
                }
                Token::Project => {
                    let loc = self.token_loc;
                    self.next();
                    let Some(dir) = self.string_literal() else {
                        self.expected("project directory");
                        self.skip_to_end_of_line();
                        continue;
                    };
                    if !self.match_tok(Token::LBrace) {
                        self.expected("'{'");
                        self.skip_to_end_of_line();
                        continue;
                    }
                    let mut args = vec![dir];
                    self.definition_list(&mut args);
                    if !self.match_tok(Token::RBrace) {
                        self.expected("'}'");
                    }
                    projects.push(self.graph.oper(OpKind::Project, loc, args));
                }
                _ => {
                    self.expected("project definition");
                    return projects;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    /// Parses definitions until a closing brace, `else`, or end of input.
    fn definition_list(&mut self, results: &mut Vec<NodeId>) {
        loop {
            match self.token {
                Token::End | Token::RBrace | Token::Else => return,
                Token::Error => {
                    self.lexer_error();
                }
                Token::Import => {
                    let loc = self.token_loc;
                    self.next();
                    let Some(name) = self.import_name() else {
                        self.skip_to_end_of_line();
                        continue;
                    };
                    if self.match_tok(Token::As) {
                        let Some(alias) = self.match_ident() else {
                            self.expected("import alias");
                            self.skip_to_end_of_line();
                            continue;
                        };
                        let span = loc.union(self.graph.loc(alias));
                        results.push(self.graph.oper(OpKind::ImportAs, span, [name, alias]));
                    } else {
                        let span = loc.union(self.graph.loc(name));
                        results.push(self.graph.oper(OpKind::Import, span, [name]));
                    }
                }
                Token::From => {
                    let loc = self.token_loc;
                    self.next();
                    let Some(name) = self.import_name() else {
                        self.skip_to_end_of_line();
                        continue;
                    };
                    if !self.match_tok(Token::Import) {
                        self.expected("'import' keyword");
                        self.skip_to_end_of_line();
                        continue;
                    }
                    if self.match_tok(Token::Star) {
                        results.push(self.graph.oper(OpKind::ImportAll, loc, [name]));
                        continue;
                    }
                    let mut args = vec![name];
                    let Some(sym) = self.match_ident() else {
                        self.expected("identifier after 'import'");
                        self.skip_to_end_of_line();
                        continue;
                    };
                    args.push(sym);
                    while self.match_tok(Token::Comma) {
                        let Some(sym) = self.match_ident() else {
                            self.expected("identifier after ','");
                            break;
                        };
                        args.push(sym);
                    }
                    results.push(self.graph.oper(OpKind::ImportFrom, loc, args));
                }
                Token::Do => {
                    self.next();
                    let Some(action) = self.expression() else {
                        self.skip_to_end_of_line();
                        continue;
                    };
                    let loc = self.graph.loc(action);
                    results.push(self.graph.oper(OpKind::MakeAction, loc, [action]));
                }
                Token::If => {
                    self.next();
                    match self.if_directive() {
                        Some(n) => results.push(n),
                        None => self.skip_to_end_of_line(),
                    }
                }
                Token::Option => {
                    self.next();
                    match self.option_def() {
                        Some(n) => results.push(n),
                        None => self.skip_to_end_of_line(),
                    }
                }
                Token::Cached => {
                    self.next();
                    match self.cached_block() {
                        Some(n) => results.push(n),
                        None => self.skip_to_end_of_line(),
                    }
                }
                Token::Ident => {
                    let Some(attr_name) = self.match_ident() else {
                        self.skip_to_end_of_line();
                        continue;
                    };
                    if !self.match_tok(Token::Assign) {
                        self.expected("assignment");
                        self.skip_to_end_of_line();
                        continue;
                    }
                    let Some(value) = self.expression() else {
                        self.skip_to_end_of_line();
                        continue;
                    };
                    let span = self.graph.loc(attr_name).union(self.graph.loc(value));
                    results.push(self.graph.oper(OpKind::SetMember, span, [attr_name, value]));
                }
                _ => {
                    self.expected("definition");
                    self.next();
                    self.skip_to_end_of_line();
                }
            }
            self.diags.recovered();
        }
    }

    /// `NAME[:NAME][.NAME]*` following `import` / `from`, folded into one
    /// string node.
    fn import_name(&mut self) -> Option<NodeId> {
        let mut loc = self.token_loc;
        if self.token != Token::Ident {
            self.expected("import name");
            return None;
        }
        let mut path = self.lexer.token_text().into_owned();
        self.next();
        while self.match_tok(Token::Dot) {
            if self.token != Token::Ident {
                self.expected("identifier");
                return None;
            }
            path.push('.');
            path.push_str(&self.lexer.token_text());
            loc = loc.union(self.token_loc);
            self.next();
        }
        let id = self.interns.intern(&path);
        Some(self.graph.string(loc, id))
    }

    /// `if (EXPR) DEFS [else DEFS]` at module level. Braced bodies are
    /// consumed through their closing brace; unbraced bodies extend to the
    /// next `else` or the end of the enclosing definition list.
    fn if_directive(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        if !self.match_tok(Token::LParen) {
            self.expected("'('");
            return None;
        }
        let test = self.expression()?;
        if !self.match_tok(Token::RParen) {
            self.expected("')'");
            return None;
        }
        let then_body = self.definition_block()?;
        if self.match_tok(Token::Else) {
            let else_body = self.definition_block()?;
            Some(self.graph.oper(OpKind::If, loc, [test, then_body, else_body]))
        } else {
            Some(self.graph.oper(OpKind::If, loc, [test, then_body]))
        }
    }

    fn definition_block(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        let braced = self.match_tok(Token::LBrace);
        let mut defs = Vec::new();
        self.definition_list(&mut defs);
        if braced && !self.match_tok(Token::RBrace) {
            self.expected("'}'");
            return None;
        }
        Some(self.graph.list(loc, TYPE_GENERIC_LIST, defs))
    }

    /// `option IDENT [: TYPE] { IDENT = EXPR ... }`
    fn option_def(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        let Some(name) = self.match_ident() else {
            self.expected("option name");
            return None;
        };
        let ty_expr = if self.match_tok(Token::Colon) {
            self.primary_type_expression()?
        } else {
            self.graph.undefined()
        };
        if !self.match_tok(Token::LBrace) {
            self.expected("'{'");
            return None;
        }
        let mut args = vec![name, ty_expr];
        self.member_assignments(&mut args);
        if !self.match_tok(Token::RBrace) {
            self.expected("'}'");
            return None;
        }
        let span = loc.union(self.prev_loc);
        Some(self.graph.oper(OpKind::MakeOption, span, args))
    }

    /// `cached IDENT { IDENT = EXPR ... }` inside a build-configuration
    /// project block: restored attribute values for one named object.
    fn cached_block(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        let Some(name) = self.match_ident() else {
            self.expected("object name");
            return None;
        };
        if !self.match_tok(Token::LBrace) {
            self.expected("'{'");
            return None;
        }
        let mut args = vec![name];
        self.member_assignments(&mut args);
        if !self.match_tok(Token::RBrace) {
            self.expected("'}'");
            return None;
        }
        Some(self.graph.oper(OpKind::MakeCached, loc, args))
    }

    /// A brace-delimited run of `IDENT = EXPR` entries separated by commas
    /// or line breaks; pushes `SetMember` nodes. Stops before `}`.
    fn member_assignments(&mut self, out: &mut Vec<NodeId>) {
        while self.token != Token::RBrace && self.token != Token::End {
            if self.token == Token::Error {
                self.lexer_error();
                continue;
            }
            let Some(key) = self.match_ident() else {
                self.expected("attribute name");
                self.skip_to_close_delim(Token::Comma, Token::RBrace);
                continue;
            };
            if !self.match_tok(Token::Assign) {
                self.expected("'='");
                self.skip_to_close_delim(Token::Comma, Token::RBrace);
                continue;
            }
            let Some(value) = self.expression() else {
                self.skip_to_close_delim(Token::Comma, Token::RBrace);
                continue;
            };
            let span = self.graph.loc(key).union(self.graph.loc(value));
            out.push(self.graph.oper(OpKind::SetMember, span, [key, value]));
            if !self.match_tok(Token::Comma) && !self.lexer.line_break_before() && self.token != Token::RBrace {
                self.expected("comma or '}'");
                self.skip_to_close_delim(Token::Comma, Token::RBrace);
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn expression(&mut self) -> Option<NodeId> {
        self.binary_operator()
    }

    fn binary_operator(&mut self) -> Option<NodeId> {
        let first = self.unary_operator()?;
        let mut stack = OperatorStack::new(first);
        loop {
            let op_token = self.token;
            let (op, prec) = match self.token {
                Token::Plus => (OpKind::Add, PREC_ADDSUB),
                Token::Minus => (OpKind::Subtract, PREC_ADDSUB),
                Token::DoublePlus => (OpKind::Concat, PREC_ADDSUB),
                Token::Star => (OpKind::Multiply, PREC_MULDIV),
                Token::Slash => (OpKind::Divide, PREC_MULDIV),
                Token::Percent => (OpKind::Modulus, PREC_MULDIV),
                Token::And => (OpKind::And, PREC_LOGICAL_AND),
                Token::Or => (OpKind::Or, PREC_LOGICAL_OR),
                Token::Equal => (OpKind::Equal, PREC_RELATIONAL),
                Token::NotEqual => (OpKind::NotEqual, PREC_RELATIONAL),
                Token::Less => (OpKind::Less, PREC_RELATIONAL),
                Token::LessEqual => (OpKind::LessEqual, PREC_RELATIONAL),
                Token::Greater => (OpKind::Greater, PREC_RELATIONAL),
                Token::GreaterEqual => (OpKind::GreaterEqual, PREC_RELATIONAL),
                Token::MapsTo => (OpKind::MapsTo, PREC_MAPSTO),
                Token::In => (OpKind::In, PREC_CONTAINS),
                Token::Not => {
                    let loc = self.token_loc;
                    self.next();
                    if self.match_tok(Token::In) {
                        (OpKind::NotIn, PREC_CONTAINS)
                    } else {
                        self.diags
                            .error(loc, self.sources, "'in' expected after 'not'");
                        return Some(stack.finish(self.graph));
                    }
                }
                _ => break,
            };
            if op_token != Token::Not {
                self.next();
            }
            stack.push_operator(self.graph, op, prec);
            let Some(rhs) = self.unary_operator() else {
                self.diags.error(
                    self.token_loc,
                    self.sources,
                    &format!("value expected after {}", op_token.name()),
                );
                return None;
            };
            stack.push_operand(rhs);
        }
        Some(stack.finish(self.graph))
    }

    fn unary_operator(&mut self) -> Option<NodeId> {
        match self.token {
            Token::Not => {
                let loc = self.token_loc;
                // `not in` is handled by the binary level; a leading `not`
                // here is a plain logical negation.
                self.next();
                let operand = self.unary_operator()?;
                Some(self.graph.oper(OpKind::Not, loc, [operand]))
            }
            Token::Minus => {
                let loc = self.token_loc;
                self.next();
                let operand = self.unary_operator()?;
                Some(self.graph.oper(OpKind::Negate, loc, [operand]))
            }
            _ => self.primary_expression(),
        }
    }

    fn primary_expression(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        let mut result = match self.token {
            Token::LParen => {
                self.next();
                let first = self.expression()?;
                if self.match_tok(Token::Comma) {
                    let mut args = vec![first];
                    while self.token != Token::End && !self.match_tok(Token::RParen) {
                        match self.expression() {
                            Some(n) => args.push(n),
                            None => {
                                self.skip_to_close_delim(Token::Comma, Token::RParen);
                                continue;
                            }
                        }
                        if self.token != Token::RParen && !self.match_tok(Token::Comma) {
                            self.expected("')'");
                            self.skip_to_close_delim(Token::End, Token::RParen);
                        }
                    }
                    let span = loc.union(self.prev_loc);
                    self.graph.oper(OpKind::MakeTuple, span, args)
                } else if self.match_tok(Token::RParen) {
                    first
                } else {
                    self.expected("')'");
                    return None;
                }
            }
            Token::LBrace => {
                self.next();
                self.dictionary_literal(loc)
            }
            Token::LBracket => {
                self.next();
                self.list_literal(loc)
            }
            Token::Integer => self.integer_literal(),
            Token::Float => self.float_literal(),
            Token::Ident => self.match_ident()?,
            Token::SelfTok => {
                self.next();
                self.graph.oper(OpKind::SelfRef, loc, [])
            }
            Token::Super => {
                self.next();
                self.graph.oper(OpKind::SuperRef, loc, [])
            }
            Token::SqString | Token::DqString => self.string_literal()?,
            Token::IstringStart => self.interpolated_string_literal()?,
            Token::True => {
                self.next();
                self.graph.bool_node(loc, true)
            }
            Token::False => {
                self.next();
                self.graph.bool_node(loc, false)
            }
            Token::Undefined => {
                self.next();
                self.graph.undefined()
            }
            Token::Do => {
                self.next();
                self.do_stmt()?
            }
            Token::Let => {
                self.next();
                self.let_stmt()?
            }
            Token::If => {
                self.next();
                self.if_stmt()?
            }
            Token::TypenameAny => self.type_token(TYPE_ANY),
            Token::TypenameBool => self.type_token(TYPE_BOOL),
            Token::TypenameInt => self.type_token(TYPE_INTEGER),
            Token::TypenameFloat => self.type_token(TYPE_FLOAT),
            Token::TypenameString => self.type_token(TYPE_STRING),
            Token::TypenameList => self.type_token(TYPE_GENERIC_LIST),
            Token::TypenameDict => self.type_token(TYPE_GENERIC_DICT),
            Token::Error => {
                self.lexer_error();
                return None;
            }
            _ => {
                let found = self.token.name();
                self.diags
                    .error(loc, self.sources, &format!("Invalid token: {found}"));
                return None;
            }
        };

        // Suffix operators: call, element access, member access, object
        // literal. A line break before `(` or `[` ends the expression so
        // the next definition is not misread as a suffix.
        loop {
            let line_break = self.lexer.line_break_before();
            if !line_break && self.token == Token::LParen {
                self.next();
                let mut args = vec![result];
                if !self.match_tok(Token::RParen) {
                    loop {
                        let Some(arg) = self.expression() else {
                            return None;
                        };
                        args.push(arg);
                        if self.match_tok(Token::RParen) {
                            break;
                        }
                        if !self.match_tok(Token::Comma) {
                            self.expected("')'");
                            self.skip_to_close_delim(Token::End, Token::RParen);
                            break;
                        }
                    }
                }
                let span = self.graph.loc(result).union(self.prev_loc);
                result = self.graph.oper(OpKind::Call, span, args);
            } else if !line_break && self.token == Token::LBracket {
                self.next();
                let mut args = vec![result];
                while !self.match_tok(Token::RBracket) {
                    let Some(arg) = self.expression() else {
                        return None;
                    };
                    args.push(arg);
                    if self.token != Token::RBracket && !self.match_tok(Token::Comma) {
                        self.expected("']'");
                        self.skip_to_close_delim(Token::End, Token::RBracket);
                    }
                }
                let span = self.graph.loc(result).union(self.prev_loc);
                result = self.graph.oper(OpKind::GetElement, span, args);
            } else if self.token == Token::Dot {
                self.next();
                let Some(ident) = self.match_ident() else {
                    self.expected("identifier");
                    break;
                };
                let span = self.graph.loc(result).union(self.graph.loc(ident));
                result = self.graph.oper(OpKind::GetMember, span, [result, ident]);
            } else if self.token == Token::LBrace {
                self.next();
                result = self.object_literal(result);
            } else {
                break;
            }
        }
        Some(result)
    }

    fn type_token(&mut self, ty: crate::types::TypeId) -> NodeId {
        let loc = self.token_loc;
        self.next();
        self.graph.type_name(loc, ty)
    }

    /// Restricted expression grammar for type positions: type names,
    /// identifiers, `undefined`, with `[...]` parameterization.
    fn primary_type_expression(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        let mut result = match self.token {
            Token::TypenameAny => self.type_token(TYPE_ANY),
            Token::TypenameBool => self.type_token(TYPE_BOOL),
            Token::TypenameInt => self.type_token(TYPE_INTEGER),
            Token::TypenameFloat => self.type_token(TYPE_FLOAT),
            Token::TypenameString => self.type_token(TYPE_STRING),
            Token::TypenameList => self.type_token(TYPE_GENERIC_LIST),
            Token::TypenameDict => self.type_token(TYPE_GENERIC_DICT),
            Token::Ident => self.match_ident()?,
            Token::Undefined => {
                self.next();
                self.graph.undefined()
            }
            _ => {
                let found = self.token.name();
                self.diags
                    .error(loc, self.sources, &format!("Invalid token: {found}"));
                return None;
            }
        };
        while self.token == Token::LBracket && !self.lexer.line_break_before() {
            self.next();
            let mut args = vec![result];
            while !self.match_tok(Token::RBracket) {
                let arg = self.primary_type_expression()?;
                args.push(arg);
                if self.token != Token::RBracket && !self.match_tok(Token::Comma) {
                    self.expected("']'");
                    self.skip_to_close_delim(Token::End, Token::RBracket);
                }
            }
            let span = self.graph.loc(result).union(self.prev_loc);
            result = self.graph.oper(OpKind::GetElement, span, args);
        }
        Some(result)
    }

    /// `do [ EXPR, EXPR ... ]` — a sequenced action block.
    fn do_stmt(&mut self) -> Option<NodeId> {
        if !self.match_tok(Token::LBracket) {
            self.expected("'['");
            return None;
        }
        let loc = self.prev_loc;
        let mut args = Vec::new();
        while self.token != Token::End && !self.match_tok(Token::RBracket) {
            match self.expression() {
                Some(n) => args.push(n),
                None => {
                    self.skip_to_close_delim(Token::Comma, Token::RBracket);
                    continue;
                }
            }
            if self.token != Token::RBracket
                && !self.match_tok(Token::Comma)
                && !self.lexer.line_break_before()
            {
                self.expected("']'");
                self.skip_to_close_delim(Token::End, Token::RBracket);
            }
        }
        let span = loc.union(self.prev_loc);
        Some(self.graph.oper(OpKind::Do, span, args))
    }

    /// `let NAME = EXPR [, NAME = EXPR]* : BODY`
    fn let_stmt(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        let mut args = Vec::new();
        loop {
            let Some(name) = self.match_ident() else {
                self.expected("identifier");
                return None;
            };
            if !self.match_tok(Token::Assign) {
                self.expected("'='");
                return None;
            }
            let value = self.expression()?;
            let span = self.graph.loc(name).union(self.graph.loc(value));
            args.push(self.graph.oper(OpKind::SetMember, span, [name, value]));
            if self.match_tok(Token::Comma) {
                continue;
            }
            if self.match_tok(Token::Colon) {
                break;
            }
            self.expected("':'");
            return None;
        }
        let body = if self.token == Token::LBracket {
            // A `do`-style action list body.
            self.do_stmt()?
        } else {
            self.expression()?
        };
        let span = loc.union(self.graph.loc(body));
        args.push(body);
        Some(self.graph.oper(OpKind::Let, span, args))
    }

    /// Expression-level `if (TEST) THEN else ELSE`.
    fn if_stmt(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        if !self.match_tok(Token::LParen) {
            self.expected("'('");
            return None;
        }
        let test = self.expression()?;
        if !self.match_tok(Token::RParen) {
            self.expected("')'");
            return None;
        }
        let then_body = self.expression()?;
        if !self.match_tok(Token::Else) {
            self.expected("'else'");
            return None;
        }
        let else_body = self.expression()?;
        Some(self.graph.oper(OpKind::If, loc, [test, then_body, else_body]))
    }

    // ------------------------------------------------------------------
    // Literals
    // ------------------------------------------------------------------

    fn integer_literal(&mut self) -> NodeId {
        let loc = self.token_loc;
        let text = self.lexer.token_text().into_owned();
        self.next();
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16)
        } else {
            text.parse::<i64>()
        };
        let value = match parsed {
            Ok(v) => v,
            Err(_) => {
                self.diags.error(
                    loc,
                    self.sources,
                    &format!("Integer value '{text}' out of range"),
                );
                0
            }
        };
        self.graph.integer(loc, value)
    }

    fn float_literal(&mut self) -> NodeId {
        let loc = self.token_loc;
        let text = self.lexer.token_text().into_owned();
        self.next();
        let value = match text.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                self.diags.error(
                    loc,
                    self.sources,
                    &format!("Floating point value '{text}' out of range"),
                );
                0.0
            }
        };
        self.graph.float(loc, value)
    }

    fn string_literal(&mut self) -> Option<NodeId> {
        if self.token != Token::SqString && self.token != Token::DqString {
            return None;
        }
        let loc = self.token_loc;
        let text = self.lexer.token_text().into_owned();
        self.next();
        let id = self.interns.intern(&text);
        Some(self.graph.string(loc, id))
    }

    /// Folds interpolated-string segments into a `Concat` (or the single
    /// segment, or the empty string).
    fn interpolated_string_literal(&mut self) -> Option<NodeId> {
        let loc = self.token_loc;
        self.next();
        let mut args = Vec::new();
        loop {
            match self.token {
                Token::IstringEnd => {
                    self.next();
                    break;
                }
                Token::End => {
                    self.expected("end of interpolated string");
                    break;
                }
                Token::Error => {
                    self.lexer_error();
                    break;
                }
                Token::StringSegment => {
                    let text = self.lexer.token_text().into_owned();
                    let seg_loc = self.token_loc;
                    self.next();
                    let id = self.interns.intern(&text);
                    args.push(self.graph.string(seg_loc, id));
                }
                _ => {
                    let expr = self.expression()?;
                    args.push(expr);
                }
            }
        }
        match args.len() {
            0 => {
                let empty = self.interns.names().empty;
                Some(self.graph.string(loc, empty))
            }
            1 => Some(args[0]),
            _ => {
                let span = loc.union(self.prev_loc);
                let node = self.graph.oper(OpKind::Concat, span, args);
                self.graph.node_mut(node).ty = TYPE_STRING;
                Some(node)
            }
        }
    }

    fn list_literal(&mut self, open_loc: Location) -> NodeId {
        let mut args = Vec::new();
        while self.token != Token::End && !self.match_tok(Token::RBracket) {
            match self.expression() {
                Some(n) => args.push(n),
                None => {
                    self.skip_to_close_delim(Token::Comma, Token::RBracket);
                    continue;
                }
            }
            if self.token != Token::RBracket
                && !self.match_tok(Token::Comma)
                && !self.lexer.line_break_before()
            {
                self.expected("']'");
                self.skip_to_close_delim(Token::End, Token::RBracket);
            }
        }
        let span = open_loc.union(self.prev_loc);
        self.graph.oper(OpKind::MakeList, span, args)
    }

    fn dictionary_literal(&mut self, open_loc: Location) -> NodeId {
        let mut args = Vec::new();
        while self.token != Token::End && !self.match_tok(Token::RBrace) {
            let Some(key) = self.primary_expression() else {
                self.skip_to_close_delim(Token::Comma, Token::RBrace);
                continue;
            };
            let op = if self.match_tok(Token::DoublePlusAssign) {
                OpKind::AppendMember
            } else if self.match_tok(Token::Assign) {
                OpKind::SetMember
            } else {
                self.expected("'='");
                self.skip_to_close_delim(Token::Comma, Token::RBrace);
                continue;
            };
            let Some(value) = self.expression() else {
                self.skip_to_close_delim(Token::Comma, Token::RBrace);
                continue;
            };
            let span = self.graph.loc(key).union(self.graph.loc(value));
            args.push(self.graph.oper(op, span, [key, value]));
            if self.token != Token::RBrace
                && !self.match_tok(Token::Comma)
                && !self.lexer.line_break_before()
            {
                self.expected("comma or '}'");
                self.skip_to_close_delim(Token::End, Token::RBrace);
            }
        }
        let span = open_loc.union(self.prev_loc);
        self.graph.oper(OpKind::MakeDict, span, args)
    }

    /// Object literal body following a prototype expression. The opening
    /// brace has already been consumed.
    fn object_literal(&mut self, prototype: NodeId) -> NodeId {
        let open_loc = self.prev_loc;
        let mut args = vec![prototype];
        while !self.match_tok(Token::RBrace) {
            if self.token == Token::End {
                self.expected("'}'");
                break;
            }
            let mut flags = AttrFlags::NONE;
            if self.match_tok(Token::Cached) {
                flags = flags.union(AttrFlags::CACHED);
            }
            if self.match_tok(Token::Param) {
                flags = flags.union(AttrFlags::PARAM);
                match self.object_param(flags) {
                    Some(n) => args.push(n),
                    None => {
                        self.skip_to_end_of_line();
                        continue;
                    }
                }
            } else if self.token == Token::Ident {
                if flags != AttrFlags::NONE {
                    self.expected("parameter definition after 'cached' modifier");
                    self.skip_to_end_of_line();
                    continue;
                }
                let Some(attr_name) = self.match_ident() else {
                    self.skip_to_end_of_line();
                    continue;
                };
                let mut deferred = false;
                let op = if self.match_tok(Token::MapsTo) {
                    deferred = true;
                    OpKind::SetMember
                } else if self.match_tok(Token::DoublePlusAssign) {
                    OpKind::AppendMember
                } else if self.match_tok(Token::Assign) {
                    OpKind::SetMember
                } else {
                    self.expected("assignment");
                    OpKind::SetMember
                };
                let Some(mut attr_value) = self.expression() else {
                    self.skip_to_end_of_line();
                    continue;
                };
                if deferred {
                    let loc = self.graph.loc(attr_value);
                    attr_value = self.graph.oper(OpKind::MakeDeferred, loc, [attr_value]);
                }
                let span = self.graph.loc(attr_name).union(self.graph.loc(attr_value));
                args.push(self.graph.oper(op, span, [attr_name, attr_value]));
            } else if self.token == Token::Error {
                self.lexer_error();
                self.skip_to_end_of_line();
            } else {
                let found = self.token.name();
                self.diags.error(
                    self.token_loc,
                    self.sources,
                    &format!("Expected object attribute definition, was {found}"),
                );
                self.next();
                self.skip_to_end_of_line();
            }

            if self.match_tok(Token::Comma) || self.lexer.line_break_before() {
                continue;
            }
            if self.token != Token::RBrace {
                self.expected("comma or '}'");
                self.skip_to_end_of_line();
            }
        }
        let span = open_loc.union(self.prev_loc);
        self.graph.oper(OpKind::MakeObject, span, args)
    }

    /// `param NAME [: TYPE] (= | =>) EXPR` inside an object literal.
    fn object_param(&mut self, mut flags: AttrFlags) -> Option<NodeId> {
        let loc = self.prev_loc;
        let Some(name) = self.match_ident() else {
            self.expected("parameter name");
            return None;
        };
        let ty_expr = if self.match_tok(Token::Colon) {
            self.primary_type_expression()?
        } else {
            self.graph.undefined()
        };
        let mut deferred = false;
        let value = if self.match_tok(Token::MapsTo) {
            deferred = true;
            self.expression()?
        } else if self.match_tok(Token::Assign) {
            self.expression()?
        } else if self.lexer.line_break_before() || self.token == Token::RBrace {
            self.graph.undefined()
        } else {
            self.expected("assignment");
            return None;
        };
        let value = if deferred {
            flags = flags.union(AttrFlags::LAZY);
            let vloc = self.graph.loc(value);
            self.graph.oper(OpKind::MakeDeferred, vloc, [value])
        } else {
            value
        };
        let span = loc.union(self.prev_loc);
        let flags_node = self
            .graph
            .integer(Location::NONE, i64::from(flags.bits()));
        Some(
            self.graph
                .oper(OpKind::MakeParam, span, [name, ty_expr, value, flags_node]),
        )
    }

    // ------------------------------------------------------------------
    // Error recovery
    // ------------------------------------------------------------------

    /// Skips tokens until a line break precedes the current token, skipping
    /// balanced parens along the way.
    fn skip_to_end_of_line(&mut self) {
        while !self.lexer.line_break_before() {
            match self.token {
                Token::End | Token::Error => return,
                Token::LParen => {
                    self.next();
                    self.skip_to_close_delim(Token::RParen, Token::End);
                }
                _ => self.next(),
            }
        }
    }

    /// Skips to `stop` (consuming it) or to `end_delim` (leaving it),
    /// stepping over nested bracketed regions.
    fn skip_to_close_delim(&mut self, stop: Token, end_delim: Token) {
        loop {
            if self.token == stop {
                self.next();
                return;
            }
            if self.token == end_delim {
                return;
            }
            match self.token {
                Token::End | Token::Error => return,
                Token::LParen => {
                    self.next();
                    self.skip_to_close_delim(Token::RParen, Token::End);
                }
                Token::LBracket => {
                    self.next();
                    self.skip_to_close_delim(Token::RBracket, Token::End);
                }
                Token::LBrace => {
                    self.next();
                    self.skip_to_close_delim(Token::RBrace, Token::End);
                }
                _ => self.next(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{graph::NodeKind, source::TextBuffer};

    struct Fixture {
        graph: Graph,
        interns: Interns,
        types: TypeRegistry,
        diags: Diagnostics,
        sources: SourceMap,
        buffer: BufferId,
    }

    impl Fixture {
        fn new(src: &str) -> Self {
            let mut sources = SourceMap::new();
            let buffer = sources.add(TextBuffer::new("test.mint", src.as_bytes().to_vec()));
            Self {
                graph: Graph::new(),
                interns: Interns::new(),
                types: TypeRegistry::new(),
                diags: Diagnostics::captured(),
                sources,
                buffer,
            }
        }

        fn parse_expr(&mut self) -> Option<NodeId> {
            let buf = self.sources.get(self.buffer);
            let mut parser = Parser::new(
                self.buffer,
                buf,
                &mut self.graph,
                &mut self.interns,
                &mut self.types,
                &mut self.diags,
                &self.sources,
            );
            parser.expression()
        }
    }

    fn op_of(graph: &Graph, id: NodeId) -> OpKind {
        graph.as_oper(id).expect("expected operator node").0
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let mut fx = Fixture::new("1 + 2 * 3");
        let expr = fx.parse_expr().expect("parse");
        let (op, args) = fx.graph.as_oper(expr).expect("oper");
        assert_eq!(op, OpKind::Add);
        let args: Vec<NodeId> = args.to_vec();
        assert!(matches!(fx.graph.kind(args[0]), NodeKind::Integer(1)));
        let (inner, inner_args) = fx.graph.as_oper(args[1]).expect("oper");
        assert_eq!(inner, OpKind::Multiply);
        assert!(matches!(fx.graph.kind(inner_args[0]), NodeKind::Integer(2)));
        assert!(matches!(fx.graph.kind(inner_args[1]), NodeKind::Integer(3)));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let mut fx = Fixture::new("1 or 2 and 3");
        let expr = fx.parse_expr().expect("parse");
        let (op, args) = fx.graph.as_oper(expr).expect("oper");
        assert_eq!(op, OpKind::Or);
        let rhs = args[1];
        assert_eq!(op_of(&fx.graph, rhs), OpKind::And);
    }

    #[test]
    fn tuple_error_recovery_keeps_good_elements() {
        let mut fx = Fixture::new("(1, ?, 2)");
        let expr = fx.parse_expr().expect("parse should recover");
        let (op, args) = fx.graph.as_oper(expr).expect("oper");
        assert_eq!(op, OpKind::MakeTuple);
        assert_eq!(args.len(), 2, "bad element should be dropped");
        assert!(fx.diags.error_count() >= 1, "diagnostic must be recorded");
    }

    #[test]
    fn member_and_call_suffixes() {
        let mut fx = Fixture::new("path.join(a, b)");
        let expr = fx.parse_expr().expect("parse");
        let (op, args) = fx.graph.as_oper(expr).expect("oper");
        assert_eq!(op, OpKind::Call);
        assert_eq!(args.len(), 3);
        assert_eq!(op_of(&fx.graph, args[0]), OpKind::GetMember);
    }

    #[test]
    fn object_literal_members() {
        let mut fx = Fixture::new("target { sources = ['a.c'], outputs => ['a.o'] }");
        let expr = fx.parse_expr().expect("parse");
        let (op, args) = fx.graph.as_oper(expr).expect("oper");
        assert_eq!(op, OpKind::MakeObject);
        assert_eq!(args.len(), 3);
        let args: Vec<NodeId> = args.to_vec();
        // First member is a plain set, second is deferred.
        assert_eq!(op_of(&fx.graph, args[1]), OpKind::SetMember);
        let (_, set_args) = fx.graph.as_oper(args[2]).expect("oper");
        let deferred = set_args[1];
        assert_eq!(op_of(&fx.graph, deferred), OpKind::MakeDeferred);
        assert_eq!(fx.diags.error_count(), 0);
    }

    #[test]
    fn interpolated_string_folds_to_concat() {
        let mut fx = Fixture::new(r#""a${x}b""#);
        let expr = fx.parse_expr().expect("parse");
        let (op, args) = fx.graph.as_oper(expr).expect("oper");
        assert_eq!(op, OpKind::Concat);
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn lambda_uses_mapsto() {
        let mut fx = Fixture::new("x => x + 1");
        let expr = fx.parse_expr().expect("parse");
        assert_eq!(op_of(&fx.graph, expr), OpKind::MapsTo);
    }

    #[test]
    fn module_definitions_parse() {
        let mut fx = Fixture::new("import base\nx = 1 + 1\noption debug : bool { help = 'd' }\n");
        let buf = fx.sources.get(fx.buffer);
        let mut parser = Parser::new(
            fx.buffer,
            buf,
            &mut fx.graph,
            &mut fx.interns,
            &mut fx.types,
            &mut fx.diags,
            &fx.sources,
        );
        let module = parser.parse_module();
        let (op, args) = fx.graph.as_oper(module).expect("oper");
        assert_eq!(op, OpKind::MakeModule);
        assert_eq!(args.len(), 3);
        let args: Vec<NodeId> = args.to_vec();
        assert_eq!(op_of(&fx.graph, args[0]), OpKind::Import);
        assert_eq!(op_of(&fx.graph, args[1]), OpKind::SetMember);
        assert_eq!(op_of(&fx.graph, args[2]), OpKind::MakeOption);
        assert_eq!(fx.diags.error_count(), 0);
    }

    /// Structural AST equality, ignoring source locations.
    fn ast_equal(graph: &Graph, interns: &Interns, a: NodeId, b: NodeId) -> bool {
        use crate::graph::NodeKind as K;
        match (graph.kind(a), graph.kind(b)) {
            (K::Undefined, K::Undefined) => true,
            (K::Bool(x), K::Bool(y)) => x == y,
            (K::Integer(x), K::Integer(y)) => x == y,
            (K::Float(x), K::Float(y)) => x == y,
            (K::Str(x), K::Str(y)) | (K::Ident(x), K::Ident(y)) => {
                interns.get(*x) == interns.get(*y)
            }
            (K::TypeName(x), K::TypeName(y)) => x == y,
            (K::Oper(op_a, args_a), K::Oper(op_b, args_b)) => {
                op_a == op_b
                    && args_a.len() == args_b.len()
                    && args_a
                        .iter()
                        .zip(args_b.iter())
                        .all(|(&ea, &eb)| ast_equal(graph, interns, ea, eb))
            }
            _ => false,
        }
    }

    #[test]
    fn printed_expressions_reparse_to_equal_asts() {
        let cases = [
            "1 + 2 * 3",
            "1 or 2 and 3",
            "not a and b",
            "-x + 4.5",
            "'a' ++ 'b'",
            "x in [1, 2, 3]",
            "y not in [1]",
            "path.join(a, b)[0]",
            "f(1, 'two', g(3))",
            "{a = 1, b = [true, false]}",
            "proto { x = 1, y => x + 1 }",
            "if (a < b) a else b",
            "let n = 2 : n * n",
            "x => x + 1",
            "self.name",
        ];
        for src in cases {
            let mut fx = Fixture::new(src);
            let first = fx.parse_expr().unwrap_or_else(|| panic!("parse {src:?}"));
            assert_eq!(fx.diags.error_count(), 0, "clean parse for {src:?}");
            let mut printed = String::new();
            crate::graph_writer::write_expr(&fx.graph, &fx.interns, first, &mut printed);

            let buffer = fx
                .sources
                .add(TextBuffer::new("<reprint>", printed.as_bytes().to_vec()));
            let second = {
                let buf = fx.sources.get(buffer);
                let mut parser = Parser::new(
                    buffer,
                    buf,
                    &mut fx.graph,
                    &mut fx.interns,
                    &mut fx.types,
                    &mut fx.diags,
                    &fx.sources,
                );
                parser
                    .expression()
                    .unwrap_or_else(|| panic!("reparse {printed:?}"))
            };
            assert_eq!(fx.diags.error_count(), 0, "clean reparse for {printed:?}");
            assert!(
                ast_equal(&fx.graph, &fx.interns, first, second),
                "round trip must preserve structure: {src:?} -> {printed:?}"
            );
        }
    }

    #[test]
    fn stray_close_delimiters_recover() {
        for src in ["x = 1)\ny = 2\n", "x = 1]\ny = 2\n", "x = 1}\ny = 2\n"] {
            let mut fx = Fixture::new(src);
            let buf = fx.sources.get(fx.buffer);
            let mut parser = Parser::new(
                fx.buffer,
                buf,
                &mut fx.graph,
                &mut fx.interns,
                &mut fx.types,
                &mut fx.diags,
                &fx.sources,
            );
            let module = parser.parse_module();
            let (_, args) = fx.graph.as_oper(module).expect("oper");
            assert!(
                fx.diags.error_count() >= 1,
                "stray delimiter must be diagnosed for {src:?}"
            );
            assert_eq!(
                args.len(),
                2,
                "both definitions should survive recovery for {src:?}"
            );
        }
    }

    #[test]
    fn projects_file_round_trips() {
        let mut fx = Fixture::new("project \"/src/app\" {\n  option debug { value = true }\n}\n");
        let buf = fx.sources.get(fx.buffer);
        let mut parser = Parser::new(
            fx.buffer,
            buf,
            &mut fx.graph,
            &mut fx.interns,
            &mut fx.types,
            &mut fx.diags,
            &fx.sources,
        );
        let projects = parser.parse_projects();
        assert_eq!(projects.len(), 1);
        let (op, args) = fx.graph.as_oper(projects[0]).expect("oper");
        assert_eq!(op, OpKind::Project);
        assert_eq!(args.len(), 2);
        assert_eq!(fx.diags.error_count(), 0);
    }
}
