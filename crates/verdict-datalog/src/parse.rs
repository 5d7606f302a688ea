//! Text front end for policy statements.
//!
//! ```text
//! p(x, "a") :- q(x, y), not r(y), plus(x, 1, z)
//! q(1, 2.5). r('b');   # separators are optional
//! ```

use nom::{
    Finish,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while},
    character::complete::{char as nomchar, multispace1, one_of, satisfy},
    combinator::{all_consuming, map as nommap, opt, recognize, value},
    error::{ErrorKind, ParseError, VerboseError, convert_error},
    multi::{many0, many0_count, separated_list0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated},
};

use crate::error::DatalogError;
use crate::formula::{Atom, Constant, Formula, Literal, Rule, Term, Variable};

type In<'a> = &'a str;
type IResult<I, O, E = VerboseError<I>> = Result<(I, O), nom::Err<E>>;

fn comment(s: In) -> IResult<In, In> {
    recognize(pair(alt((tag("//"), tag("#"))), opt(is_not("\n"))))(s)
}

fn ws(s: In) -> IResult<In, ()> {
    value((), many0_count(alt((multispace1, comment))))(s)
}

fn wsl<'a, F, O>(inner: F) -> impl FnMut(In<'a>) -> IResult<In<'a>, O>
where
    F: FnMut(In<'a>) -> IResult<In<'a>, O>,
{
    preceded(ws, inner)
}

fn ident(s: In) -> IResult<In, In> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(s)
}

/// `table` or `policy:table`, with an optional `+`/`-` update suffix.
fn table_name(s: In) -> IResult<In, In> {
    recognize(pair(
        pair(ident, many0_count(pair(nomchar(':'), ident))),
        opt(one_of("+-")),
    ))(s)
}

fn number(s: In) -> IResult<In, Constant> {
    let (rest, text) = recognize_float(s)?;
    let parsed = if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(Constant::Float)
    } else {
        text.parse::<i64>().ok().map(Constant::Int)
    };
    match parsed {
        Some(c) => Ok((rest, c)),
        None => Err(nom::Err::Error(VerboseError::from_error_kind(
            s,
            ErrorKind::Digit,
        ))),
    }
}

fn quoted<'a>(quote: char, forbidden: &'static str) -> impl FnMut(In<'a>) -> IResult<In<'a>, String> {
    let escape = alt((
        value("\\", tag("\\")),
        value("\"", tag("\"")),
        value("'", tag("'")),
        value("\n", tag("n")),
        value("\t", tag("t")),
    ));
    let body = nommap(
        opt(escaped_transform(is_not(forbidden), '\\', escape)),
        Option::unwrap_or_default,
    );
    delimited(nomchar(quote), body, nomchar(quote))
}

fn string(s: In) -> IResult<In, String> {
    alt((quoted('"', "\\\""), quoted('\'', "\\'")))(s)
}

fn term(s: In) -> IResult<In, Term> {
    wsl(alt((
        nommap(string, |v| Term::Constant(Constant::String(v))),
        nommap(number, Term::Constant),
        nommap(ident, |v| Term::Variable(Variable::new(v))),
    )))(s)
}

fn atom(s: In) -> IResult<In, Atom> {
    let arguments = delimited(
        wsl(nomchar('(')),
        separated_list0(wsl(nomchar(',')), term),
        wsl(nomchar(')')),
    );
    nommap(pair(wsl(table_name), arguments), |(table, args)| {
        Atom::new(table, args)
    })(s)
}

fn literal(s: In) -> IResult<In, Literal> {
    let negated = nommap(
        preceded(wsl(terminated(tag("not"), multispace1)), atom),
        Literal::negative,
    );
    alt((negated, nommap(atom, Literal::positive)))(s)
}

fn statement(s: In) -> IResult<In, Formula> {
    let body = preceded(wsl(tag(":-")), separated_list1(wsl(nomchar(',')), literal));
    let formula = nommap(pair(atom, opt(body)), |(head, body)| {
        Formula::from(Rule::new(head, body.unwrap_or_default()))
    });
    terminated(formula, opt(wsl(one_of(".;"))))(s)
}

fn program(s: In) -> IResult<In, Vec<Formula>> {
    all_consuming(terminated(many0(statement), ws))(s)
}

/// Parse zero or more statements.
pub fn parse(text: &str) -> Result<Vec<Formula>, DatalogError> {
    match program(text).finish() {
        Ok((_, formulas)) => Ok(formulas),
        Err(e) => Err(DatalogError::Parse(convert_error(text, e))),
    }
}

/// Parse exactly one statement.
pub fn parse1(text: &str) -> Result<Formula, DatalogError> {
    let mut formulas = parse(text)?;
    if formulas.len() != 1 {
        return Err(DatalogError::NotAStatement(text.trim().to_string()));
    }
    Ok(formulas.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(text: &str) -> Vec<String> {
        parse(text)
            .expect("parses")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_rule_round_trips() {
        let text = "p(x, \"a\") :- q(x, y), not r(y), plus(x, 1, z)";
        assert_eq!(render(text), vec![text.to_string()]);
    }

    #[test]
    fn test_statement_separators_and_comments() {
        let text = "
            // facts
            q(1, 2.5). r('b');
            # a rule
            p(x) :- q(x, y)
            s(-3)
        ";
        assert_eq!(
            render(text),
            vec!["q(1, 2.5)", "r(\"b\")", "p(x) :- q(x, y)", "s(-3)"]
        );
    }

    #[test]
    fn test_constant_types() {
        let Formula::Atom(atom) = parse1(r#"p(1, 1.0, -2, "x\"y", 'it\'s')"#).expect("parses") else {
            panic!("expected an atom");
        };
        assert_eq!(atom.arguments[0], Term::Constant(Constant::Int(1)));
        assert_eq!(atom.arguments[1], Term::Constant(Constant::Float(1.0)));
        assert_eq!(atom.arguments[2], Term::Constant(Constant::Int(-2)));
        assert_eq!(atom.arguments[3], Term::Constant(Constant::from("x\"y")));
        assert_eq!(atom.arguments[4], Term::Constant(Constant::from("it's")));
    }

    #[test]
    fn test_empty_strings_and_zero_arity() {
        assert_eq!(render("p(\"\", '') q()"), vec!["p(\"\", \"\")", "q()"]);
    }

    #[test]
    fn test_module_qualified_tables() {
        let formula = parse1("p(x) :- nova:servers(x)").expect("parses");
        let Formula::Rule(rule) = formula else {
            panic!("expected a rule");
        };
        assert_eq!(rule.body[0].table(), "nova:servers");
    }

    #[test]
    fn test_update_tables() {
        assert_eq!(
            render("p+(x) :- q(x), not r-(x)  s-(1, -2)"),
            vec!["p+(x) :- q(x), not r-(x)", "s-(1, -2)"]
        );
        assert!(matches!(parse("p++(x)"), Err(DatalogError::Parse(_))));
    }

    #[test]
    fn test_parse1_requires_one_statement() {
        assert!(matches!(
            parse1("p(1) q(2)"),
            Err(DatalogError::NotAStatement(_))
        ));
        assert!(matches!(parse1(""), Err(DatalogError::NotAStatement(_))));
    }

    #[test]
    fn test_malformed_input_is_a_parse_error() {
        assert!(matches!(parse("p(x"), Err(DatalogError::Parse(_))));
        assert!(matches!(parse("not p(x)"), Err(DatalogError::Parse(_))));
        assert!(matches!(parse("p(x) :- "), Err(DatalogError::Parse(_))));
    }
}
