// Recursive-descent parser for the MATCH query language:
//
//   MATCH <pattern> [WHERE <cond>] [RETURN <items>] [ORDER BY <items>] [SKIP <n>] [LIMIT <n>]
//
// Keywords match case-insensitively. Identifiers and string literals keep the
// case they were written in.

use super::ast::*;
use super::lexer::{tokenize, Spanned, Token};
use mindmap_common::{QueryError, QueryParams, Value};
use std::collections::BTreeMap;

struct QueryParser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    params: &'a QueryParams,
}

/// Parse `text` into a typed plan, resolving `$name` values from `params`.
pub fn parse(text: &str, params: &QueryParams) -> Result<QueryPlan, QueryError> {
    let tokens = tokenize(text)?;
    QueryParser { tokens, pos: 0, params }.parse_query()
}

impl<'a> QueryParser<'a> {
    fn parse_query(mut self) -> Result<QueryPlan, QueryError> {
        let mut plan = QueryPlan::default();

        self.expect_keyword("MATCH")?;
        self.parse_pattern(&mut plan)?;
        while self.eat(&Token::Comma) {
            self.parse_pattern(&mut plan)?;
        }

        if self.eat_keyword("WHERE") {
            plan.where_clause = Some(self.parse_where()?);
        }
        if self.eat_keyword("RETURN") {
            plan.return_clause = Some(self.parse_return()?);
        }
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            plan.order_by = Some(self.parse_order_by()?);
        }

        // SKIP and LIMIT may come in either order, once each.
        loop {
            if plan.skip.is_none() && self.eat_keyword("SKIP") {
                plan.skip = Some(self.parse_count("SKIP")?);
            } else if plan.limit.is_none() && self.eat_keyword("LIMIT") {
                plan.limit = Some(self.parse_count("LIMIT")?);
            } else {
                break;
            }
        }

        if let Some(extra) = self.tokens.get(self.pos) {
            return Err(QueryError::Parse(format!(
                "unexpected {:?} at offset {}",
                extra.token, extra.offset
            )));
        }

        Ok(plan)
    }

    fn parse_pattern(&mut self, plan: &mut QueryPlan) -> Result<(), QueryError> {
        plan.node_patterns.push(self.parse_node_pattern()?);

        while matches!(self.peek(), Some(Token::Dash) | Some(Token::LeftArrow)) {
            plan.edge_patterns.push(self.parse_edge_pattern()?);
            plan.node_patterns.push(self.parse_node_pattern()?);
        }
        Ok(())
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern, QueryError> {
        self.expect(&Token::LParen, "'('")?;
        let mut pattern = NodePattern::default();

        if let Some(Token::Ident(name)) = self.peek() {
            pattern.variable = Some(name.clone());
            self.pos += 1;
        }
        if self.eat(&Token::Colon) {
            pattern.labels.push(self.expect_ident("label")?);
        }
        if self.eat(&Token::LBrace) {
            pattern.properties = self.parse_properties()?;
        }

        self.expect(&Token::RParen, "')'")?;
        Ok(pattern)
    }

    fn parse_properties(&mut self) -> Result<BTreeMap<String, Value>, QueryError> {
        let mut properties = BTreeMap::new();
        if self.eat(&Token::RBrace) {
            return Ok(properties);
        }
        loop {
            let key = self.expect_ident("property name")?;
            self.expect(&Token::Colon, "':'")?;
            let value = self.parse_value()?;
            properties.insert(key, value);

            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBrace, "'}'")?;
            return Ok(properties);
        }
    }

    fn parse_edge_pattern(&mut self) -> Result<EdgePattern, QueryError> {
        let incoming = self.eat(&Token::LeftArrow);
        if !incoming {
            self.expect(&Token::Dash, "'-'")?;
        }

        let mut variable = None;
        let mut edge_type = None;
        if self.eat(&Token::LBracket) {
            if let Some(Token::Ident(name)) = self.peek() {
                variable = Some(name.clone());
                self.pos += 1;
            }
            if self.eat(&Token::Colon) {
                edge_type = Some(self.expect_ident("relationship type")?);
            }
            self.expect(&Token::RBracket, "']'")?;
        }

        let outgoing = self.eat(&Token::Arrow);
        if !outgoing {
            self.expect(&Token::Dash, "'-' or '->'")?;
        }

        let direction = match (incoming, outgoing) {
            (false, true) => EdgeDirection::Out,
            (true, false) => EdgeDirection::In,
            (false, false) => EdgeDirection::Both,
            (true, true) => {
                return Err(QueryError::Parse("edge cannot point both ways ('<-...->')".into()));
            }
        };

        Ok(EdgePattern { variable, edge_type, direction })
    }

    fn parse_where(&mut self) -> Result<WhereClause, QueryError> {
        let mut conditions = vec![self.parse_condition()?];
        let mut operator: Option<LogicalOperator> = None;

        loop {
            let next = if self.eat_keyword("AND") {
                LogicalOperator::And
            } else if self.eat_keyword("OR") {
                LogicalOperator::Or
            } else {
                break;
            };

            match operator {
                Some(op) if op != next => {
                    return Err(QueryError::Parse(
                        "WHERE clause cannot mix AND and OR".into(),
                    ));
                }
                _ => operator = Some(next),
            }
            conditions.push(self.parse_condition()?);
        }

        Ok(WhereClause {
            conditions,
            operator: operator.unwrap_or(LogicalOperator::And),
        })
    }

    fn parse_condition(&mut self) -> Result<Condition, QueryError> {
        let left = self.parse_field_path()?;
        let operator = self.parse_comparison_operator()?;
        let right = self.parse_value()?;
        Ok(Condition { left, operator, right })
    }

    fn parse_comparison_operator(&mut self) -> Result<ComparisonOperator, QueryError> {
        let symbolic = match self.peek() {
            Some(Token::Eq) => Some(ComparisonOperator::Eq),
            Some(Token::Ne) => Some(ComparisonOperator::Ne),
            Some(Token::Gt) => Some(ComparisonOperator::Gt),
            Some(Token::Lt) => Some(ComparisonOperator::Lt),
            Some(Token::Gte) => Some(ComparisonOperator::Gte),
            Some(Token::Lte) => Some(ComparisonOperator::Lte),
            _ => None,
        };
        if let Some(op) = symbolic {
            self.pos += 1;
            return Ok(op);
        }

        // `n.x <-3` lexes as `<-` then `3`; in operator position it is `<` `-3`.
        if let Some(spanned) = self.tokens.get_mut(self.pos) {
            if spanned.token == Token::LeftArrow {
                spanned.token = Token::Dash;
                spanned.offset += 1;
                return Ok(ComparisonOperator::Lt);
            }
        }

        if self.eat_keyword("CONTAINS") {
            Ok(ComparisonOperator::Contains)
        } else if self.eat_keyword("REGEX") {
            Ok(ComparisonOperator::Regex)
        } else if self.eat_keyword("STARTS") {
            self.expect_keyword("WITH")?;
            Ok(ComparisonOperator::StartsWith)
        } else if self.eat_keyword("ENDS") {
            self.expect_keyword("WITH")?;
            Ok(ComparisonOperator::EndsWith)
        } else {
            Err(self.error("comparison operator"))
        }
    }

    fn parse_return(&mut self) -> Result<ReturnClause, QueryError> {
        let mut items = vec![self.parse_return_item()?];
        while self.eat(&Token::Comma) {
            items.push(self.parse_return_item()?);
        }
        Ok(ReturnClause { items })
    }

    fn parse_return_item(&mut self) -> Result<ReturnItem, QueryError> {
        let is_call = matches!(
            (self.peek(), self.tokens.get(self.pos + 1).map(|s| &s.token)),
            (Some(Token::Ident(_)), Some(Token::LParen))
        );

        let (expression, aggregate) = if is_call {
            let name = self.expect_ident("function name")?;
            let aggregate = AggregateFunction::from_name(&name)
                .ok_or_else(|| QueryError::Parse(format!("unknown aggregate function '{}'", name)))?;
            self.expect(&Token::LParen, "'('")?;
            let expression = self.parse_return_expression()?;
            self.expect(&Token::RParen, "')'")?;
            (expression, Some(aggregate))
        } else {
            (self.parse_return_expression()?, None)
        };

        let alias = if self.eat_keyword("AS") {
            Some(self.expect_ident("alias")?)
        } else {
            None
        };

        Ok(ReturnItem { expression, alias, aggregate })
    }

    fn parse_return_expression(&mut self) -> Result<String, QueryError> {
        if self.eat(&Token::Star) {
            return Ok("*".to_string());
        }
        self.parse_field_path()
    }

    fn parse_order_by(&mut self) -> Result<OrderByClause, QueryError> {
        let mut items = Vec::new();
        loop {
            let expression = self.parse_field_path()?;
            let direction = if self.eat_keyword("DESC") {
                SortDirection::Desc
            } else {
                self.eat_keyword("ASC");
                SortDirection::Asc
            };
            items.push(OrderItem { expression, direction });

            if !self.eat(&Token::Comma) {
                return Ok(OrderByClause { items });
            }
        }
    }

    fn parse_count(&mut self, clause: &str) -> Result<usize, QueryError> {
        match self.peek() {
            Some(Token::Int(n)) if *n >= 0 => {
                let n = *n as usize;
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.error(&format!("non-negative integer after {}", clause))),
        }
    }

    fn parse_field_path(&mut self) -> Result<String, QueryError> {
        let mut path = self.expect_ident("field name")?;
        while self.eat(&Token::Dot) {
            path.push('.');
            path.push_str(&self.expect_ident("field name")?);
        }
        Ok(path)
    }

    /// Literal value: quoted string, integer, float, boolean, null, `$param`,
    /// or a bare word taken as a raw string.
    fn parse_value(&mut self) -> Result<Value, QueryError> {
        let token = match self.tokens.get(self.pos) {
            Some(spanned) => spanned.token.clone(),
            None => return Err(self.error("value")),
        };
        self.pos += 1;

        match token {
            Token::Str(s) => Ok(Value::Str(s)),
            Token::Int(i) => Ok(Value::Int(i)),
            Token::Float(f) => Ok(Value::Float(f)),
            Token::Dash => match self.tokens.get(self.pos).map(|s| s.token.clone()) {
                Some(Token::Int(i)) => {
                    self.pos += 1;
                    Ok(Value::Int(-i))
                }
                Some(Token::Float(f)) => {
                    self.pos += 1;
                    Ok(Value::Float(-f))
                }
                _ => Err(self.error("number after '-'")),
            },
            Token::Param(name) => self.params.get(&name)
                .map(Value::from)
                .ok_or_else(|| QueryError::Parse(format!("missing parameter '${}'", name))),
            Token::Ident(word) => Ok(match word.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                _ => Value::Str(word),
            }),
            _ => {
                self.pos -= 1;
                Err(self.error("value"))
            }
        }
    }

    // --- token helpers ---

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), QueryError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(what))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), QueryError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(keyword))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, QueryError> {
        match self.peek() {
            Some(Token::Ident(word)) => {
                let word = word.clone();
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.error(what)),
        }
    }

    fn error(&self, expected: &str) -> QueryError {
        match self.tokens.get(self.pos) {
            Some(found) => QueryError::Parse(format!(
                "expected {} at offset {}, found {:?}",
                expected, found.offset, found.token
            )),
            None => QueryError::Parse(format!("expected {} but query ended", expected)),
        }
    }
}
