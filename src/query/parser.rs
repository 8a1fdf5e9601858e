//! Query Parser
//!
//! Parses query text into a [`Command`]. The whole text is rejected on any
//! error; there is no partial AST.
//!
//! # Supported Syntax
//!
//! ```text
//! describe all
//! describe <metric> [where <predicate>]
//! select <expr> [, <expr>]* [where <predicate>]
//!        [from <time>] [to <time>] [resolution <duration>] [sample by <method>]
//! ```
//!
//! Keywords are case-insensitive. Times are `now`, `-<duration>`, epoch
//! milliseconds or a quoted RFC 3339 timestamp. Durations take a
//! `ms|s|m|h|d|w` suffix.
//!
//! # Examples
//!
//! ```text
//! describe cpu.load where host = web1
//! select cpu.load[dc in (us, eu)] * 100 from -6h resolution 5m sample by max
//! select aggregate.sum(mem.used group by dc), scale(cpu.load, 0.5) where host match '^web'
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{all_consuming, cut, map, map_opt, not, opt, recognize, value},
    error::{ErrorKind, ParseError},
    multi::{many0, separated_list0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::api::{MetricKey, Predicate, SampleMethod};
use crate::error::{QueryError, QueryResult};
use crate::query::ast::*;

/// Parser error: either a syntax error at some position, or a semantic
/// rejection (bad regex, bad timestamp) that must not be backtracked over.
#[derive(Debug)]
enum SyntaxError<'a> {
    Nom(&'a str),
    Invalid(QueryError),
}

impl<'a> ParseError<&'a str> for SyntaxError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        SyntaxError::Nom(input)
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl SyntaxError<'_> {
    fn into_query_error(self) -> QueryError {
        match self {
            SyntaxError::Invalid(e) => e,
            SyntaxError::Nom(rest) if rest.trim().is_empty() => {
                QueryError::Parse("Unexpected end of query".to_string())
            }
            SyntaxError::Nom(rest) => {
                let excerpt: String = rest.trim().chars().take(24).collect();
                QueryError::Parse(format!("Unexpected input at '{}'", excerpt))
            }
        }
    }
}

type PResult<'a, T> = IResult<&'a str, T, SyntaxError<'a>>;

fn invalid<'a>(error: QueryError) -> nom::Err<SyntaxError<'a>> {
    nom::Err::Failure(SyntaxError::Invalid(error))
}

/// Parse a query string into a Command
pub fn parse(input: &str) -> QueryResult<Command> {
    let input = input.trim();

    match all_consuming(terminated(parse_command, multispace0))(input) {
        Ok((_, command)) => Ok(command),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e.into_query_error()),
        Err(nom::Err::Incomplete(_)) => Err(QueryError::Parse("Incomplete query".to_string())),
    }
}

fn parse_command(input: &str) -> PResult<'_, Command> {
    alt((parse_describe_all, parse_describe, parse_select))(input)
}

/// Parse `describe all`
fn parse_describe_all(input: &str) -> PResult<'_, Command> {
    value(
        Command::DescribeAll,
        tuple((keyword("describe"), multispace1, keyword("all"))),
    )(input)
}

/// Parse `describe <metric> [where <predicate>]`
fn parse_describe(input: &str) -> PResult<'_, Command> {
    let (input, _) = keyword("describe")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, metric) = cut(parse_metric_name)(input)?;
    let (input, predicate) = opt(parse_where_clause)(input)?;

    Ok((
        input,
        Command::Describe(DescribeCommand {
            metric,
            predicate: predicate.unwrap_or(Predicate::All),
        }),
    ))
}

/// Parse `select <expr>, ... [where ...] [from ...] [to ...] [resolution ...] [sample by ...]`
fn parse_select(input: &str) -> PResult<'_, Command> {
    let (input, _) = keyword("select")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, expressions) = cut(separated_list1(
        delimited(multispace0, char(','), multispace0),
        parse_expression,
    ))(input)?;
    let (input, predicate) = opt(parse_where_clause)(input)?;
    let (input, start) = opt(parse_clause("from", parse_time))(input)?;
    let (input, end) = opt(parse_clause("to", parse_time))(input)?;
    let (input, resolution) = opt(parse_clause("resolution", parse_duration))(input)?;
    let (input, sample_method) = opt(parse_sample_clause)(input)?;

    let defaults = ContextNode::default();
    Ok((
        input,
        Command::Select(SelectCommand {
            predicate: predicate.unwrap_or(Predicate::All),
            expressions,
            context: ContextNode {
                start: start.unwrap_or(defaults.start),
                end: end.unwrap_or(defaults.end),
                resolution: resolution.unwrap_or(defaults.resolution),
                sample_method: sample_method.unwrap_or(defaults.sample_method),
            },
        }),
    ))
}

/// A keyword followed by a mandatory argument
fn parse_clause<'a, O, F>(word: &'static str, argument: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    preceded(
        tuple((multispace0, keyword(word), multispace0)),
        cut(argument),
    )
}

fn parse_where_clause(input: &str) -> PResult<'_, Predicate> {
    parse_clause("where", parse_predicate)(input)
}

/// Parse `sample by <method>`
fn parse_sample_clause(input: &str) -> PResult<'_, SampleMethod> {
    let (input, _) = tuple((multispace0, keyword("sample"), multispace1))(input)?;
    let (input, _) = cut(pair(keyword("by"), multispace1))(input)?;
    cut(map_opt(take_while1(|c: char| c.is_alphabetic()), SampleMethod::from_str))(input)
}

/// `term ((+|-) term)*`, left-associative
fn parse_expression(input: &str) -> PResult<'_, Expression> {
    let (input, first) = parse_term(input)?;
    let (input, rest) = many0(pair(
        preceded(
            multispace0,
            alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-')))),
        ),
        preceded(multispace0, parse_term),
    ))(input)?;

    Ok((input, fold_binary(first, rest)))
}

/// `factor ((*|/) factor)*`, left-associative
fn parse_term(input: &str) -> PResult<'_, Expression> {
    let (input, first) = parse_factor(input)?;
    let (input, rest) = many0(pair(
        preceded(
            multispace0,
            alt((value(BinaryOp::Mul, char('*')), value(BinaryOp::Div, char('/')))),
        ),
        preceded(multispace0, parse_factor),
    ))(input)?;

    Ok((input, fold_binary(first, rest)))
}

fn fold_binary(first: Expression, rest: Vec<(BinaryOp, Expression)>) -> Expression {
    rest.into_iter()
        .fold(first, |left, (op, right)| Expression::combine(op, left, right))
}

fn parse_factor(input: &str) -> PResult<'_, Expression> {
    alt((
        delimited(
            pair(char('('), multispace0),
            cut(parse_expression),
            cut(pair(multispace0, char(')'))),
        ),
        parse_aggregate,
        parse_scale,
        map(parse_number, Expression::Scalar),
        parse_fetch,
    ))(input)
}

/// Parse `aggregate.<func>(<expr> [group by k, ...])`
fn parse_aggregate(input: &str) -> PResult<'_, Expression> {
    let (input, _) = tag_no_case("aggregate.")(input)?;
    let (input, func) = map_opt(take_while1(|c: char| c.is_alphabetic()), AggregationFunc::from_str)(input)?;
    let (input, _) = pair(multispace0, char('('))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, child) = cut(parse_expression)(input)?;
    let (input, group_by) = opt(preceded(
        tuple((multispace1, keyword("group"), multispace1, keyword("by"), multispace1)),
        cut(separated_list1(
            delimited(multispace0, char(','), multispace0),
            map(parse_tag_key, String::from),
        )),
    ))(input)?;
    let (input, _) = cut(pair(multispace0, char(')')))(input)?;

    Ok((
        input,
        Expression::aggregate(func, child, group_by.unwrap_or_default()),
    ))
}

/// Parse `scale(<expr>, <number>)`
fn parse_scale(input: &str) -> PResult<'_, Expression> {
    let (input, _) = keyword("scale")(input)?;
    let (input, _) = pair(multispace0, char('('))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, child) = cut(parse_expression)(input)?;
    let (input, _) = cut(tuple((multispace0, char(','), multispace0)))(input)?;
    let (input, factor) = cut(parse_number)(input)?;
    let (input, _) = cut(pair(multispace0, char(')')))(input)?;

    Ok((input, Expression::scale(factor, child)))
}

/// Parse `metric` or `metric[<predicate>]`
fn parse_fetch(input: &str) -> PResult<'_, Expression> {
    let (input, metric) = parse_metric_name(input)?;
    let (input, predicate) = opt(delimited(
        pair(char('['), multispace0),
        cut(parse_predicate),
        cut(pair(multispace0, char(']'))),
    ))(input)?;

    Ok((
        input,
        Expression::MetricFetch {
            metric,
            predicate: predicate.unwrap_or(Predicate::All),
        },
    ))
}

/// Finite numbers only; `1e400` would render as `inf`, which reads back as a metric
fn parse_number(input: &str) -> PResult<'_, f64> {
    map_opt(recognize_float, |s: &str| {
        s.parse::<f64>().ok().filter(|v| v.is_finite())
    })(input)
}

/// `and_group (or and_group)*`
fn parse_predicate(input: &str) -> PResult<'_, Predicate> {
    let (input, first) = parse_and_group(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace0, keyword("or"), multispace0)),
        parse_and_group,
    ))(input)?;

    Ok((input, collect_operands(first, rest, Predicate::Or)))
}

/// `negation (and negation)*`
fn parse_and_group(input: &str) -> PResult<'_, Predicate> {
    let (input, first) = parse_negation(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace0, keyword("and"), multispace0)),
        parse_negation,
    ))(input)?;

    Ok((input, collect_operands(first, rest, Predicate::And)))
}

fn collect_operands(
    first: Predicate,
    rest: Vec<Predicate>,
    combine: fn(Vec<Predicate>) -> Predicate,
) -> Predicate {
    if rest.is_empty() {
        return first;
    }
    let mut operands = vec![first];
    operands.extend(rest);
    combine(operands)
}

fn parse_negation(input: &str) -> PResult<'_, Predicate> {
    alt((
        map(
            preceded(pair(keyword("not"), multispace0), parse_negation),
            Predicate::not,
        ),
        parse_predicate_atom,
    ))(input)
}

fn parse_predicate_atom(input: &str) -> PResult<'_, Predicate> {
    alt((
        delimited(
            pair(char('('), multispace0),
            cut(parse_predicate),
            cut(pair(multispace0, char(')'))),
        ),
        parse_tag_condition,
        value(Predicate::All, keyword("true")),
    ))(input)
}

/// Parse `key = v`, `key != v`, `key in (v, ...)` or `key match 'regex'`
fn parse_tag_condition(input: &str) -> PResult<'_, Predicate> {
    let (input, key) = parse_tag_key(input)?;
    let (input, _) = multispace0(input)?;

    let result = alt((
        map(
            preceded(pair(tag("!="), multispace0), cut(parse_tag_value)),
            move |v| Predicate::not(Predicate::equal(key, v)),
        ),
        map(
            preceded(pair(char('='), multispace0), cut(parse_tag_value)),
            move |v| Predicate::equal(key, v),
        ),
        map(
            preceded(pair(keyword("in"), multispace0), cut(parse_value_list)),
            move |values| Predicate::list_match(key, values),
        ),
        move |input| parse_regex_match(key, input),
    ))(input);
    result
}

fn parse_regex_match<'a>(key: &str, input: &'a str) -> PResult<'a, Predicate> {
    let (input, _) = pair(keyword("match"), multispace0)(input)?;
    let (input, pattern) = cut(parse_tag_value)(input)?;

    match Predicate::regex(key, &pattern) {
        Ok(predicate) => Ok((input, predicate)),
        Err(e) => Err(invalid(e)),
    }
}

fn parse_value_list(input: &str) -> PResult<'_, Vec<String>> {
    delimited(
        pair(char('('), multispace0),
        separated_list0(delimited(multispace0, char(','), multispace0), parse_tag_value),
        pair(multispace0, char(')')),
    )(input)
}

fn parse_tag_value(input: &str) -> PResult<'_, String> {
    alt((
        parse_quoted_string,
        map(take_while1(is_word_char), String::from),
    ))(input)
}

fn parse_time(input: &str) -> PResult<'_, TimeExpr> {
    alt((
        value(TimeExpr::Now, keyword("now")),
        parse_relative_time,
        parse_rfc3339_time,
        map_opt(recognize(pair(opt(char('-')), digit1)), |s: &str| {
            s.parse().ok().map(TimeExpr::Absolute)
        }),
    ))(input)
}

/// Parse `-1h` or `+30s`
fn parse_relative_time(input: &str) -> PResult<'_, TimeExpr> {
    let (input, sign) = alt((value(-1i64, char('-')), value(1i64, char('+'))))(input)?;
    let (input, duration) = parse_duration(input)?;
    Ok((input, TimeExpr::Relative(sign * duration)))
}

fn parse_rfc3339_time(input: &str) -> PResult<'_, TimeExpr> {
    let (input, text) = parse_quoted_string(input)?;

    match chrono::DateTime::parse_from_rfc3339(&text) {
        Ok(dt) => Ok((input, TimeExpr::Absolute(dt.timestamp_millis()))),
        Err(e) => Err(invalid(QueryError::Parse(format!(
            "Invalid timestamp '{}': {}",
            text, e
        )))),
    }
}

/// Parse duration like "7d", "24h", "30m", "500ms"; result in milliseconds
fn parse_duration(input: &str) -> PResult<'_, i64> {
    let (input, num) = map_opt(digit1, |s: &str| s.parse::<i64>().ok())(input)?;
    let (input, unit) = terminated(
        alt((
            value(1i64, tag_no_case("ms")),
            value(SECOND_MS, tag_no_case("s")),
            value(MINUTE_MS, tag_no_case("m")),
            value(HOUR_MS, tag_no_case("h")),
            value(DAY_MS, tag_no_case("d")),
            value(WEEK_MS, tag_no_case("w")),
        )),
        not(satisfy(is_word_char)),
    )(input)?;

    match num.checked_mul(unit) {
        Some(ms) => Ok((input, ms)),
        None => Err(invalid(QueryError::Parse(format!(
            "Duration overflows: {}",
            num
        )))),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '-' | '/')
}

/// Case-insensitive keyword not immediately followed by a word character
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    terminated(tag_no_case(word), not(satisfy(is_word_char)))
}

/// Metric names start with a letter or `_` and continue with `[A-Za-z0-9_.:]`
fn parse_metric_name(input: &str) -> PResult<'_, MetricKey> {
    map(
        recognize(pair(
            take_while1(|c: char| c.is_alphabetic() || c == '_'),
            take_while(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | ':')),
        )),
        MetricKey::new,
    )(input)
}

fn parse_tag_key(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_word_char),
    ))(input)
}

/// Parse quoted string; no escapes, so values cannot contain `'`
fn parse_quoted_string(input: &str) -> PResult<'_, String> {
    let (input, _) = char('\'')(input)?;
    let (input, content) = take_while(|c| c != '\'')(input)?;
    let (input, _) = cut(char('\''))(input)?;
    Ok((input, content.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TagSet;

    fn select(text: &str) -> SelectCommand {
        match parse(text).unwrap() {
            Command::Select(cmd) => cmd,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_describe_all() {
        assert_eq!(parse("describe all").unwrap(), Command::DescribeAll);
        assert_eq!(parse("  DESCRIBE   ALL  ").unwrap(), Command::DescribeAll);
    }

    #[test]
    fn test_parse_describe_with_bare_value() {
        let cmd = parse("describe cpu.load where host=web1").unwrap();
        assert_eq!(
            cmd,
            Command::Describe(DescribeCommand {
                metric: MetricKey::new("cpu.load"),
                predicate: Predicate::equal("host", "web1"),
            })
        );
    }

    #[test]
    fn test_describe_metric_starting_with_all() {
        let cmd = parse("describe allocations").unwrap();
        assert!(matches!(cmd, Command::Describe(ref d) if d.metric.as_str() == "allocations"));
    }

    #[test]
    fn test_parse_select_defaults() {
        let cmd = select("select cpu.load");
        assert_eq!(cmd.expressions, vec![Expression::fetch("cpu.load")]);
        assert_eq!(cmd.predicate, Predicate::All);
        assert_eq!(cmd.context, ContextNode::default());
    }

    #[test]
    fn test_parse_select_clauses() {
        let cmd = select(
            "SELECT cpu.load FROM -6h TO 1700000000000 RESOLUTION 5m SAMPLE BY max",
        );
        assert_eq!(cmd.context.start, TimeExpr::Relative(-6 * HOUR_MS));
        assert_eq!(cmd.context.end, TimeExpr::Absolute(1_700_000_000_000));
        assert_eq!(cmd.context.resolution, 5 * MINUTE_MS);
        assert_eq!(cmd.context.sample_method, SampleMethod::Max);
    }

    #[test]
    fn test_parse_rfc3339_time() {
        let cmd = select("select cpu.load from '2024-01-15T00:00:00Z' to now");
        assert_eq!(cmd.context.start, TimeExpr::Absolute(1_705_276_800_000));

        let err = parse("select cpu.load from 'yesterday'").unwrap_err();
        assert!(matches!(err, QueryError::Parse(ref m) if m.contains("yesterday")));
    }

    #[test]
    fn test_operator_precedence() {
        let cmd = select("select a + b * 2 - c");
        let expected = Expression::combine(
            BinaryOp::Sub,
            Expression::combine(
                BinaryOp::Add,
                Expression::fetch("a"),
                Expression::combine(BinaryOp::Mul, Expression::fetch("b"), Expression::Scalar(2.0)),
            ),
            Expression::fetch("c"),
        );
        assert_eq!(cmd.expressions, vec![expected]);
    }

    #[test]
    fn test_parse_functions() {
        let cmd = select(
            "select aggregate.sum(cpu.load[dc = us] group by host, dc), scale(mem.used, 0.5)",
        );
        assert_eq!(
            cmd.expressions,
            vec![
                Expression::aggregate(
                    AggregationFunc::Sum,
                    Expression::MetricFetch {
                        metric: MetricKey::new("cpu.load"),
                        predicate: Predicate::equal("dc", "us"),
                    },
                    vec!["host".to_string(), "dc".to_string()],
                ),
                Expression::scale(0.5, Expression::fetch("mem.used")),
            ]
        );
    }

    #[test]
    fn test_function_names_are_not_reserved_metrics() {
        let cmd = select("select scale, aggregate.summary");
        assert_eq!(
            cmd.expressions,
            vec![Expression::fetch("scale"), Expression::fetch("aggregate.summary")]
        );
    }

    #[test]
    fn test_predicate_precedence() {
        let cmd = select("select x where a = 1 or b = 2 and not c != 3");
        let expected = Predicate::Or(vec![
            Predicate::equal("a", "1"),
            Predicate::And(vec![
                Predicate::equal("b", "2"),
                Predicate::not(Predicate::not(Predicate::equal("c", "3"))),
            ]),
        ]);
        assert_eq!(cmd.predicate, expected);
    }

    #[test]
    fn test_predicate_leaves() {
        let cmd = select("select x where host match '^web' and dc in ('us', eu) and true");
        let Predicate::And(operands) = cmd.predicate else {
            panic!("expected conjunction");
        };
        assert_eq!(operands[0], Predicate::regex("host", "^web").unwrap());
        assert_eq!(operands[1], Predicate::list_match("dc", ["us", "eu"]));
        assert_eq!(operands[2], Predicate::All);

        let tags = TagSet::new().tag("host", "web1").tag("dc", "eu");
        assert!(Predicate::And(operands).apply(&tags));
    }

    #[test]
    fn test_invalid_regex_is_validation_error() {
        let err = parse("describe cpu.load where host match 'web['").unwrap_err();
        assert!(matches!(err, QueryError::Validation(_)));
    }

    #[test]
    fn test_parse_errors() {
        for text in [
            "",
            "INVALID mood",
            "select",
            "select cpu.load where",
            "select cpu.load from",
            "select cpu.load resolution 5 minutes",
            "select cpu.load sample by median",
            "select (cpu.load + 1",
            "select aggregate.sum(cpu.load",
            "describe cpu.load where host =",
            "describe all extra",
            "select 1e400",
            "select scale(cpu.load, -1e999)",
        ] {
            let result = parse(text);
            assert!(
                matches!(result, Err(QueryError::Parse(_))),
                "{:?} gave {:?}",
                text,
                result
            );
        }
    }

    #[test]
    fn test_canonical_round_trip() {
        for text in [
            "describe all",
            "describe cpu.load",
            "describe cpu.load where host=web1",
            "describe cpu.load where not (host = web1 or dc in (us, eu))",
            "select cpu.load from -1h to now",
            "select cpu.load[host match 'web[0-9]+'] / 100, 3 where dc = 'us' \
             from 1700000000000 to +0ms resolution 90s sample by count",
            "select aggregate.mean(a * b + c group by dc) - scale(d, -2.5)",
            "select ((a)), (a - (b - c))",
            "select 1e300 * 2.5e-3, scale(a, 1.7976931348623157e308)",
        ] {
            let parsed = parse(text).unwrap();
            let canonical = parsed.to_string();
            let reparsed = parse(&canonical).unwrap();
            assert_eq!(reparsed, parsed, "{} -> {}", text, canonical);
            assert_eq!(reparsed.to_string(), canonical);
        }
    }

    #[test]
    fn test_canonical_form() {
        let cmd = parse("select cpu.load where host=web1 from -1h").unwrap();
        assert_eq!(
            cmd.to_string(),
            "select cpu.load where host = 'web1' from -1h to now resolution 1m sample by mean"
        );
    }
}
