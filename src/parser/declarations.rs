//! Declaration specifiers, declarators, initializers and external declarations.

use log::trace;

use super::ast::*;
use super::{ParseError, Parser};
use crate::diagnostic::{Diagnostic, SourceLoc};
use crate::lexer::TokenKind;
use crate::types::{CType, StorageClass, TypeQualifiers};

/// Whether a declarator must, may or must not name something
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DeclaratorMode {
    Named,
    Abstract,
    Either,
}

/// Counts of the basic type specifier keywords seen so far
#[derive(Debug, Default)]
struct TypeSpecCounts {
    void: u8,
    bool_: u8,
    char_: u8,
    short: u8,
    int: u8,
    long: u8,
    signed: u8,
    unsigned: u8,
}

impl TypeSpecCounts {
    fn any(&self) -> bool {
        self.void + self.bool_ + self.char_ + self.short + self.int + self.long + self.signed + self.unsigned > 0
    }

    fn resolve(&self) -> Option<CType> {
        let signed = self.unsigned == 0;
        if self.signed > 1 || self.unsigned > 1 || (self.signed > 0 && self.unsigned > 0) || self.int > 1 {
            return None;
        }
        let sign_spec = self.signed + self.unsigned;
        let ty = match (self.void, self.bool_, self.char_, self.short, self.long) {
            (1, 0, 0, 0, 0) if sign_spec == 0 && self.int == 0 => CType::Void,
            (0, 1, 0, 0, 0) if sign_spec == 0 && self.int == 0 => CType::Bool,
            (0, 0, 1, 0, 0) if self.int == 0 => CType::Char { signed },
            (0, 0, 0, 1, 0) => CType::Short { signed },
            (0, 0, 0, 0, 1) => CType::Long { signed },
            (0, 0, 0, 0, 2) => CType::LongLong { signed },
            (0, 0, 0, 0, 0) => CType::Int { signed },
            _ => return None,
        };
        Some(ty)
    }
}

impl Parser<'_, '_> {
    /// Does the token at `offset` begin declaration specifiers?
    pub(super) fn is_declaration_start_at(&self, offset: usize) -> bool {
        let kind = self.peek_kind(offset);
        matches!(
            kind,
            TokenKind::Typedef
                | TokenKind::Extern
                | TokenKind::Static
                | TokenKind::Auto
                | TokenKind::Register
                | TokenKind::Inline
                | TokenKind::Noreturn
                | TokenKind::Extension
        ) || self.is_type_name_start_at(offset)
    }

    /// Does the token at `offset` begin a type name (specifier or qualifier)?
    pub(super) fn is_type_name_start_at(&self, offset: usize) -> bool {
        let kind = self.peek_kind(offset);
        matches!(
            kind,
            TokenKind::Void
                | TokenKind::Bool
                | TokenKind::Char
                | TokenKind::Short
                | TokenKind::Int
                | TokenKind::Long
                | TokenKind::Signed
                | TokenKind::Unsigned
                | TokenKind::Float
                | TokenKind::Double
                | TokenKind::Struct
                | TokenKind::Union
                | TokenKind::Enum
                | TokenKind::Const
                | TokenKind::Volatile
                | TokenKind::Restrict
                | TokenKind::Attribute
        ) || self.is_typedef_name(kind)
    }

    pub(super) fn parse_external_declaration(&mut self) -> Result<Option<ExternalDecl>, ParseError> {
        if self.is(&TokenKind::StaticAssert) {
            return Ok(Some(ExternalDecl::StaticAssert(self.parse_static_assert()?)));
        }
        if self.is(&TokenKind::Semicolon) {
            let loc = self.advance().loc;
            if self.lang_opts.pedantic {
                self.diag.report(
                    Diagnostic::warning("extra ';' outside of a function")
                        .with_code("extra-semi")
                        .at(loc),
                );
            }
            return Ok(None);
        }

        let specifiers = if self.is_declaration_start_at(0) {
            self.parse_declaration_specifiers()?
        } else if matches!(self.kind(), TokenKind::Identifier(_)) {
            // `main() { ... }` in old code
            let loc = self.loc();
            self.implicit_int(&loc);
            DeclSpecifiers {
                storage: StorageClass::None,
                base: ParsedType::base(CType::INT),
                inline: false,
                enumerators: Vec::new(),
                loc,
            }
        } else {
            return Err(ParseError::expected("external declaration", self.loc()));
        };

        if self.accept(&TokenKind::Semicolon) {
            return Ok(Some(ExternalDecl::Declaration(self.finish_empty_declaration(specifiers))));
        }

        let (name, name_loc, ty) = self.parse_named_declarator(specifiers.base.clone())?;
        if ty.is_function() && self.is(&TokenKind::LeftBrace) {
            return self.parse_function_definition(specifiers, name, name_loc, ty).map(Some);
        }

        let first = (name, name_loc, ty);
        let declarators = self.parse_init_declarators(&specifiers, Some(first))?;
        Ok(Some(ExternalDecl::Declaration(Declaration {
            specifiers,
            declarators,
        })))
    }

    fn parse_function_definition(
        &mut self,
        specifiers: DeclSpecifiers,
        name: String,
        loc: SourceLoc,
        ty: ParsedType,
    ) -> Result<ExternalDecl, ParseError> {
        if specifiers.storage == StorageClass::Typedef {
            return Err(ParseError::syntax("function definition declared 'typedef'", loc));
        }
        trace!("function definition '{}'", name);
        self.declare_ordinary(&name);

        self.push_scope();
        if let ParsedType::Function { params, .. } = &ty {
            for param in params {
                if let Some(param_name) = &param.name {
                    self.declare_ordinary(param_name);
                }
            }
        }
        let body = self.parse_compound_statement();
        self.pop_scope();

        Ok(ExternalDecl::Function(FunctionDef {
            specifiers,
            name,
            ty,
            body: body?,
            loc,
        }))
    }

    /// Declaration without declarators, such as `enum E { A, B };`
    fn finish_empty_declaration(&mut self, specifiers: DeclSpecifiers) -> Declaration {
        if specifiers.enumerators.is_empty() {
            self.diag.report(
                Diagnostic::warning("declaration does not declare anything")
                    .with_code("missing-declarations")
                    .at(specifiers.loc.clone()),
            );
        }
        Declaration {
            specifiers,
            declarators: Vec::new(),
        }
    }

    /// Declaration inside a block or a `for` header, after the specifiers were recognized.
    pub(super) fn parse_declaration(&mut self) -> Result<Declaration, ParseError> {
        let specifiers = self.parse_declaration_specifiers()?;
        if self.accept(&TokenKind::Semicolon) {
            return Ok(self.finish_empty_declaration(specifiers));
        }
        let declarators = self.parse_init_declarators(&specifiers, None)?;
        Ok(Declaration {
            specifiers,
            declarators,
        })
    }

    fn parse_init_declarators(
        &mut self,
        specifiers: &DeclSpecifiers,
        first: Option<(String, SourceLoc, ParsedType)>,
    ) -> Result<Vec<InitDeclarator>, ParseError> {
        let mut declarators = Vec::new();
        let mut pending = first;
        loop {
            let (name, loc, ty) = match pending.take() {
                Some(first) => first,
                None => self.parse_named_declarator(specifiers.base.clone())?,
            };
            self.skip_annotations()?;

            if specifiers.storage == StorageClass::Typedef {
                self.declare_typedef(&name, ty.clone());
            } else {
                self.declare_ordinary(&name);
            }

            let init = if self.accept(&TokenKind::Assign) {
                if specifiers.storage == StorageClass::Typedef {
                    return Err(ParseError::syntax(
                        "illegal initializer (only variables can be initialized)",
                        loc,
                    ));
                }
                Some(self.parse_initializer()?)
            } else {
                None
            };
            declarators.push(InitDeclarator { name, ty, init, loc });

            if !self.accept(&TokenKind::Comma) {
                break;
            }
        }
        if !self.is(&TokenKind::Semicolon) {
            return Err(ParseError::expected("';' after declaration", self.loc()));
        }
        self.advance();
        Ok(declarators)
    }

    fn implicit_int(&mut self, loc: &SourceLoc) {
        let msg = "type specifier missing, defaults to 'int'";
        if self.lang_opts.c_standard.stdc_version().is_none() {
            self.diag
                .report(Diagnostic::warning(msg).with_code("implicit-int").at(loc.clone()));
        } else {
            self.diag.report(
                Diagnostic::error(format!("{}; ISO C99 and later do not support implicit int", msg)).at(loc.clone()),
            );
        }
    }

    pub(super) fn parse_declaration_specifiers(&mut self) -> Result<DeclSpecifiers, ParseError> {
        let loc = self.loc();
        let mut storage = StorageClass::None;
        let mut quals = TypeQualifiers::empty();
        let mut inline = false;
        let mut counts = TypeSpecCounts::default();
        let mut typedef_ty: Option<ParsedType> = None;
        let mut enumerators = Vec::new();
        let mut saw_enum = false;

        loop {
            let kind = self.kind().clone();
            let class = match kind {
                TokenKind::Typedef => Some(StorageClass::Typedef),
                TokenKind::Extern => Some(StorageClass::Extern),
                TokenKind::Static => Some(StorageClass::Static),
                TokenKind::Auto => Some(StorageClass::Auto),
                TokenKind::Register => Some(StorageClass::Register),
                _ => None,
            };
            if let Some(class) = class {
                if storage != StorageClass::None {
                    return Err(ParseError::syntax(
                        "multiple storage classes in declaration specifiers",
                        self.loc(),
                    ));
                }
                storage = class;
                self.advance();
                continue;
            }

            match kind {
                TokenKind::Const => quals |= TypeQualifiers::CONST,
                TokenKind::Volatile => quals |= TypeQualifiers::VOLATILE,
                TokenKind::Restrict => quals |= TypeQualifiers::RESTRICT,
                TokenKind::Inline => inline = true,
                TokenKind::Noreturn | TokenKind::Extension => {}
                TokenKind::Attribute => {
                    self.skip_annotations()?;
                    continue;
                }
                TokenKind::Void => counts.void += 1,
                TokenKind::Bool => counts.bool_ += 1,
                TokenKind::Char => counts.char_ += 1,
                TokenKind::Short => counts.short += 1,
                TokenKind::Int => counts.int += 1,
                TokenKind::Long => counts.long += 1,
                TokenKind::Signed => counts.signed += 1,
                TokenKind::Unsigned => counts.unsigned += 1,
                TokenKind::Float | TokenKind::Double => {
                    return Err(ParseError::unsupported(
                        "floating-point types are not supported",
                        self.loc(),
                    ));
                }
                TokenKind::Struct | TokenKind::Union => {
                    return Err(ParseError::unsupported(
                        "struct and union types are not supported",
                        self.loc(),
                    ));
                }
                TokenKind::Enum => {
                    if saw_enum || counts.any() || typedef_ty.is_some() {
                        return Err(ParseError::syntax(
                            "cannot combine with previous declaration specifier",
                            self.loc(),
                        ));
                    }
                    self.advance();
                    enumerators = self.parse_enum_body()?;
                    saw_enum = true;
                    continue;
                }
                TokenKind::Identifier(ref name) if !counts.any() && typedef_ty.is_none() && !saw_enum => {
                    match self.typedef_type(name) {
                        Some(ty) => typedef_ty = Some(ty.clone()),
                        None => break,
                    }
                }
                _ => break,
            }
            self.advance();
        }

        let base_ty = if let Some(ty) = typedef_ty {
            if counts.any() {
                return Err(ParseError::syntax(
                    "cannot combine with previous declaration specifier",
                    loc,
                ));
            }
            ty
        } else if saw_enum {
            if counts.any() {
                return Err(ParseError::syntax(
                    "cannot combine with previous declaration specifier",
                    loc,
                ));
            }
            ParsedType::base(CType::INT)
        } else {
            if !counts.any() {
                self.implicit_int(&loc);
            }
            match counts.resolve() {
                Some(ty) => ParsedType::base(ty),
                None => {
                    return Err(ParseError::syntax("invalid combination of type specifiers", loc));
                }
            }
        };

        Ok(DeclSpecifiers {
            storage,
            base: base_ty.with_qualifiers(quals),
            inline,
            enumerators,
            loc,
        })
    }

    /// After `enum`: optional tag, then an optional `{ A, B = 2, ... }` list.
    fn parse_enum_body(&mut self) -> Result<Vec<Enumerator>, ParseError> {
        self.skip_annotations()?;
        let tagged = matches!(self.kind(), TokenKind::Identifier(_));
        if tagged {
            self.advance();
        }
        if !self.accept(&TokenKind::LeftBrace) {
            if !tagged {
                return Err(ParseError::expected("identifier or '{'", self.loc()));
            }
            return Ok(Vec::new());
        }

        let mut enumerators = Vec::new();
        while !self.is(&TokenKind::RightBrace) {
            let (name, loc) = self.expect_identifier()?;
            let value = if self.accept(&TokenKind::Assign) {
                Some(self.parse_conditional_expression()?)
            } else {
                None
            };
            self.declare_ordinary(&name);
            enumerators.push(Enumerator { name, value, loc });
            if !self.accept(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace)?;
        if enumerators.is_empty() {
            return Err(ParseError::syntax("use of empty enum", self.loc()));
        }
        Ok(enumerators)
    }

    pub(super) fn parse_type_qualifiers(&mut self) -> TypeQualifiers {
        let mut quals = TypeQualifiers::empty();
        loop {
            match self.kind() {
                TokenKind::Const => quals |= TypeQualifiers::CONST,
                TokenKind::Volatile => quals |= TypeQualifiers::VOLATILE,
                TokenKind::Restrict => quals |= TypeQualifiers::RESTRICT,
                _ => return quals,
            }
            self.advance();
        }
    }

    fn parse_named_declarator(&mut self, base: ParsedType) -> Result<(String, SourceLoc, ParsedType), ParseError> {
        let (name, ty) = self.parse_declarator(base, DeclaratorMode::Named)?;
        match name {
            Some((name, loc)) => Ok((name, loc, ty)),
            None => Err(ParseError::expected("identifier", self.loc())),
        }
    }

    /// Pointers, then a direct declarator. Returns the declared name (if any) and the full type.
    pub(super) fn parse_declarator(
        &mut self,
        base: ParsedType,
        mode: DeclaratorMode,
    ) -> Result<(Option<(String, SourceLoc)>, ParsedType), ParseError> {
        let mut ty = base;
        while self.accept(&TokenKind::Star) {
            let quals = self.parse_type_qualifiers();
            ty = ParsedType::Pointer {
                pointee: Box::new(ty),
                quals,
            };
        }
        self.skip_annotations()?;

        let mut name = None;
        let mut nested_start = None;
        match self.kind() {
            TokenKind::Identifier(ident) if mode != DeclaratorMode::Abstract => {
                let ident = ident.clone();
                let loc = self.advance().loc;
                name = Some((ident, loc));
            }
            TokenKind::LeftParen if self.is_nested_declarator(mode) => {
                self.advance();
                nested_start = Some(self.pos);
                self.skip_balanced_parens()?;
            }
            _ if mode == DeclaratorMode::Named => {
                return Err(ParseError::expected("identifier or '('", self.loc()));
            }
            _ => {}
        }

        let ty = self.parse_declarator_suffixes(ty)?;

        // `(*name)(args)`: the inner declarator applies to the type built by the suffixes
        if let Some(start) = nested_start {
            let end = self.pos;
            self.pos = start;
            let inner = self.parse_declarator(ty, mode)?;
            self.expect(TokenKind::RightParen)?;
            self.pos = end;
            return Ok(inner);
        }
        Ok((name, ty))
    }

    fn is_nested_declarator(&self, mode: DeclaratorMode) -> bool {
        match self.peek_kind(1) {
            TokenKind::Star | TokenKind::LeftParen | TokenKind::Attribute => true,
            TokenKind::LeftBracket => mode != DeclaratorMode::Named,
            TokenKind::Identifier(_) => mode != DeclaratorMode::Abstract && !self.is_typedef_name(self.peek_kind(1)),
            _ => false,
        }
    }

    fn parse_declarator_suffixes(&mut self, base: ParsedType) -> Result<ParsedType, ParseError> {
        enum Suffix {
            Array(Option<Box<Expr>>),
            Function(Vec<ParamDecl>, bool, bool),
        }

        let mut suffixes = Vec::new();
        loop {
            if self.accept(&TokenKind::LeftBracket) {
                self.accept(&TokenKind::Static);
                self.parse_type_qualifiers();
                let size = if self.is(&TokenKind::RightBracket) {
                    None
                } else {
                    Some(Box::new(self.parse_assignment_expression()?))
                };
                self.expect(TokenKind::RightBracket)?;
                suffixes.push(Suffix::Array(size));
            } else if self.is(&TokenKind::LeftParen) {
                self.advance();
                let (params, variadic, prototyped) = self.parse_parameter_list()?;
                suffixes.push(Suffix::Function(params, variadic, prototyped));
            } else {
                break;
            }
        }

        let mut ty = base;
        for suffix in suffixes.into_iter().rev() {
            ty = match suffix {
                Suffix::Array(size) => ParsedType::Array {
                    elem: Box::new(ty),
                    size,
                },
                Suffix::Function(params, variadic, prototyped) => ParsedType::Function {
                    ret: Box::new(ty),
                    params,
                    variadic,
                    prototyped,
                },
            };
        }
        Ok(ty)
    }

    /// After `(`: a prototype parameter list, `void`, or `)` for an unprototyped declarator.
    fn parse_parameter_list(&mut self) -> Result<(Vec<ParamDecl>, bool, bool), ParseError> {
        if self.accept(&TokenKind::RightParen) {
            return Ok((Vec::new(), false, false));
        }
        if self.is(&TokenKind::Void) && matches!(self.peek_kind(1), TokenKind::RightParen) {
            self.advance();
            self.advance();
            return Ok((Vec::new(), false, true));
        }

        let mut params = Vec::new();
        let mut variadic = false;
        self.push_scope();
        let result = self.parse_parameters(&mut params, &mut variadic);
        self.pop_scope();
        result?;
        Ok((params, variadic, true))
    }

    fn parse_parameters(&mut self, params: &mut Vec<ParamDecl>, variadic: &mut bool) -> Result<(), ParseError> {
        loop {
            if self.accept(&TokenKind::Ellipsis) {
                *variadic = true;
                break;
            }
            if !self.is_declaration_start_at(0) {
                if matches!(self.kind(), TokenKind::Identifier(_)) {
                    return Err(ParseError::unsupported(
                        "identifier lists in function declarators are not supported",
                        self.loc(),
                    ));
                }
                return Err(ParseError::expected("parameter declarator", self.loc()));
            }
            let loc = self.loc();
            let specifiers = self.parse_declaration_specifiers()?;
            if !matches!(specifiers.storage, StorageClass::None | StorageClass::Register) {
                return Err(ParseError::syntax(
                    "invalid storage class specifier in function declarator",
                    loc,
                ));
            }
            let (name, ty) = self.parse_declarator(specifiers.base, DeclaratorMode::Either)?;
            let (name, loc) = match name {
                Some((name, name_loc)) => {
                    self.declare_ordinary(&name);
                    (Some(name), name_loc)
                }
                None => (None, loc),
            };
            params.push(ParamDecl { name, ty, loc });
            if !self.accept(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(())
    }

    /// `type-name` as used by casts and `sizeof`
    pub(super) fn parse_type_name(&mut self) -> Result<ParsedType, ParseError> {
        let specifiers = self.parse_declaration_specifiers()?;
        if specifiers.storage != StorageClass::None {
            return Err(ParseError::syntax("type name does not allow storage class", specifiers.loc));
        }
        let (_, ty) = self.parse_declarator(specifiers.base, DeclaratorMode::Abstract)?;
        Ok(ty)
    }

    fn parse_initializer(&mut self) -> Result<Initializer, ParseError> {
        if !self.is(&TokenKind::LeftBrace) {
            return Ok(Initializer::Expr(self.parse_assignment_expression()?));
        }
        let loc = self.advance().loc;
        let mut items = Vec::new();
        while !self.is(&TokenKind::RightBrace) {
            if matches!(self.kind(), TokenKind::Dot | TokenKind::LeftBracket) {
                return Err(ParseError::unsupported(
                    "designated initializers are not supported",
                    self.loc(),
                ));
            }
            items.push(self.parse_initializer()?);
            if !self.accept(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace)?;
        Ok(Initializer::List(items, loc))
    }

    /// `_Static_assert ( constant-expression [, string-literal] ) ;`
    pub(super) fn parse_static_assert(&mut self) -> Result<StaticAssert, ParseError> {
        let loc = self.expect(TokenKind::StaticAssert)?.loc;
        self.expect(TokenKind::LeftParen)?;
        let cond = self.parse_conditional_expression()?;
        let mut message = None;
        if self.accept(&TokenKind::Comma) {
            match self.kind() {
                TokenKind::StringLiteral(bytes) => {
                    message = Some(bytes.clone());
                    self.advance();
                }
                _ => return Err(ParseError::expected("string literal", self.loc())),
            }
        }
        self.expect(TokenKind::RightParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(StaticAssert { cond, message, loc })
    }
}
