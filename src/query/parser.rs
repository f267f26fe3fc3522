/// Query-string tokenizer.
///
/// Turns a raw URL query string such as
/// `filter[where][Name][contains]=*Test*&filter[order]=Id%20DESC&query=q`
/// into an ordered list of [`Directive`]s. This layer knows the grammar of
/// the keys but nothing about entities; field names and values are checked
/// later by the model builder.
use crate::error::ParseError;

use super::command::{Command, Directive, OperatorKind, OrderDirective};

pub const AND_GROUP: &str = "and";
pub const OR_GROUP: &str = "or";

/// Parse a raw query string (with or without the leading `?`).
pub fn parse(raw: &str) -> Result<Vec<Directive>, ParseError> {
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let mut directives = Vec::new();

    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = pair.split_once('=') else {
            return Err(ParseError::new(
                decode(pair).unwrap_or_else(|_| pair.to_string()),
                "expected a key=value pair",
            ));
        };
        let key = decode(raw_key)?;
        let value = decode(raw_value)?;
        parse_pair(&key, &value, &mut directives)?;
    }

    Ok(directives)
}

fn decode(text: &str) -> Result<String, ParseError> {
    let spaced = text.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|_| ParseError::new(text, "invalid percent-encoding"))
}

/// Split `filter[where][Name][eq]` into `("filter", ["where", "Name", "eq"])`.
fn split_key(key: &str) -> Result<(&str, Vec<&str>), ParseError> {
    let (head, mut rest) = match key.find('[') {
        Some(i) => (&key[..i], &key[i..]),
        None => (key, ""),
    };
    if head.is_empty() || head.contains(']') {
        return Err(ParseError::new(key, "malformed key"));
    }

    let mut segments = Vec::new();
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return Err(ParseError::new(key, "unexpected text between brackets"));
        };
        let Some(end) = inner.find(']') else {
            return Err(ParseError::new(key, "unbalanced brackets"));
        };
        let segment = &inner[..end];
        if segment.contains('[') {
            return Err(ParseError::new(key, "nested brackets"));
        }
        if segment.trim().is_empty() {
            return Err(ParseError::new(key, "empty bracket segment"));
        }
        segments.push(segment);
        rest = &inner[end + 1..];
    }

    Ok((head, segments))
}

fn parse_pair(key: &str, value: &str, out: &mut Vec<Directive>) -> Result<(), ParseError> {
    let (head, segments) = split_key(key)?;
    let source = format!("{}={}", key, value);

    match head {
        "query" => {
            if !segments.is_empty() {
                return Err(ParseError::new(key, "'query' takes no brackets"));
            }
            out.push(Directive::FreeText(value.to_string()));
        }
        "filter" => {
            let Some((&directive, rest)) = segments.split_first() else {
                return Err(ParseError::new(key, "missing filter directive"));
            };
            match directive {
                "where" => out.push(Directive::Where(parse_where(key, rest, value, source)?)),
                "order" => out.extend(parse_order(key, rest, value, &source)?),
                "skip" => out.push(Directive::Skip {
                    value: parse_count(key, rest, value)?,
                    source,
                }),
                "limit" => out.push(Directive::Limit {
                    value: parse_count(key, rest, value)?,
                    source,
                }),
                "include" => out.push(Directive::Include {
                    path: parse_listed(key, rest, value)?,
                    source,
                }),
                "select" => out.push(Directive::Select {
                    field: parse_listed(key, rest, value)?,
                    source,
                }),
                other => {
                    return Err(ParseError::new(
                        key,
                        format!("unknown filter directive '{}'", other),
                    ))
                }
            }
        }
        other => {
            return Err(ParseError::new(
                key,
                format!("unknown query parameter '{}'", other),
            ))
        }
    }

    Ok(())
}

fn parse_where(
    key: &str,
    segments: &[&str],
    value: &str,
    source: String,
) -> Result<Command, ParseError> {
    let (is_or, rest) = match segments.split_first() {
        Some((&"or", rest)) => (true, rest),
        _ => (false, segments),
    };

    let (field, operator) = match rest {
        [field] => (*field, OperatorKind::Equal),
        [field, op] => {
            let operator = OperatorKind::from_wire(op)
                .ok_or_else(|| ParseError::new(key, format!("unknown operator '{}'", op)))?;
            (*field, operator)
        }
        [] => return Err(ParseError::new(key, "missing field name")),
        _ => return Err(ParseError::new(key, "too many bracket segments")),
    };

    let path: Vec<String> = field.split('.').map(|s| s.trim().to_string()).collect();
    if path.iter().any(String::is_empty) {
        return Err(ParseError::new(key, "empty field path segment"));
    }

    Ok(Command {
        path,
        operator,
        raw_value: value.to_string(),
        group_id: if is_or { OR_GROUP } else { AND_GROUP }.to_string(),
        is_or,
        source,
    })
}

/// `filter[order]=A ASC,B DESC` or `filter[order][1]=B DESC`.
fn parse_order(
    key: &str,
    segments: &[&str],
    value: &str,
    source: &str,
) -> Result<Vec<Directive>, ParseError> {
    let index = parse_position(key, segments)?;

    let mut directives = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut tokens = entry.split_whitespace();
        let field = tokens.next().unwrap_or_default();
        let ascending = match tokens.next() {
            None => true,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => true,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => false,
            Some(dir) => {
                return Err(ParseError::new(
                    key,
                    format!("unknown sort direction '{}'", dir),
                ))
            }
        };
        if tokens.next().is_some() {
            return Err(ParseError::new(key, format!("malformed order '{}'", entry)));
        }
        directives.push(Directive::Order(OrderDirective {
            index,
            field: field.to_string(),
            ascending,
            source: source.to_string(),
        }));
    }

    if directives.is_empty() {
        return Err(ParseError::new(key, "empty order"));
    }
    Ok(directives)
}

fn parse_count(key: &str, segments: &[&str], value: &str) -> Result<usize, ParseError> {
    if !segments.is_empty() {
        return Err(ParseError::new(key, "too many bracket segments"));
    }
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ParseError::new(key, format!("'{}' is not a non-negative integer", value)))
}

/// Repeatable directives (`include`, `select`) accept an optional position.
fn parse_listed(key: &str, segments: &[&str], value: &str) -> Result<String, ParseError> {
    parse_position(key, segments)?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::new(key, "empty value"));
    }
    Ok(value.to_string())
}

fn parse_position(key: &str, segments: &[&str]) -> Result<usize, ParseError> {
    match segments {
        [] => Ok(0),
        [n] => n
            .trim()
            .parse::<usize>()
            .map_err(|_| ParseError::new(key, format!("'{}' is not a position", n))),
        _ => Err(ParseError::new(key, "too many bracket segments")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_command(raw: &str) -> Command {
        let directives = parse(raw).unwrap();
        assert_eq!(directives.len(), 1, "expected one directive for {}", raw);
        match directives.into_iter().next() {
            Some(Directive::Where(cmd)) => cmd,
            other => panic!("expected a where command, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_query_string() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("?").unwrap().is_empty());
    }

    #[test]
    fn test_where_with_operator() {
        let cmd = single_command("?filter[where][Name][contains]=*Test*");
        assert_eq!(cmd.path, vec!["Name"]);
        assert_eq!(cmd.operator, OperatorKind::Contains);
        assert_eq!(cmd.raw_value, "*Test*");
        assert_eq!(cmd.group_id, AND_GROUP);
        assert!(!cmd.is_or);
        assert_eq!(cmd.source, "filter[where][Name][contains]=*Test*");
    }

    #[test]
    fn test_where_without_operator_defaults_to_eq() {
        let cmd = single_command("filter[where][Id]=5");
        assert_eq!(cmd.operator, OperatorKind::Equal);
        assert_eq!(cmd.raw_value, "5");
    }

    #[test]
    fn test_where_or_group() {
        let directives = parse("filter[where][or][Id][lte]=2&filter[where][or][Id][gte]=9").unwrap();
        assert_eq!(directives.len(), 2);
        for d in directives {
            match d {
                Directive::Where(cmd) => {
                    assert!(cmd.is_or);
                    assert_eq!(cmd.group_id, OR_GROUP);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_where_keeps_escaped_pipe_and_empty_value() {
        let cmd = single_command("filter[where][Name][eq]=Test1|Tes\\|t4");
        assert_eq!(cmd.raw_value, "Test1|Tes\\|t4");
        let cmd = single_command("filter[where][ContactIp][eq]=");
        assert_eq!(cmd.raw_value, "");
    }

    #[test]
    fn test_percent_decoding() {
        let cmd = single_command("filter%5Bwhere%5D%5BName%5D=Test%201+q");
        assert_eq!(cmd.path, vec!["Name"]);
        assert_eq!(cmd.raw_value, "Test 1 q");
    }

    #[test]
    fn test_dotted_field_path() {
        let cmd = single_command("filter[where][Contact.Email]=a@b.c");
        assert_eq!(cmd.path, vec!["Contact", "Email"]);
        assert_eq!(cmd.field_name(), "Contact");
    }

    #[test]
    fn test_order_variants() {
        let directives =
            parse("filter[order][1]=Id%20DESC&filter[order][0]=AffiliateName%20ASC").unwrap();
        assert_eq!(
            directives,
            vec![
                Directive::Order(OrderDirective {
                    index: 1,
                    field: "Id".into(),
                    ascending: false,
                    source: "filter[order][1]=Id DESC".into(),
                }),
                Directive::Order(OrderDirective {
                    index: 0,
                    field: "AffiliateName".into(),
                    ascending: true,
                    source: "filter[order][0]=AffiliateName ASC".into(),
                }),
            ]
        );

        let directives = parse("filter[order]=Id").unwrap();
        assert!(matches!(
            &directives[0],
            Directive::Order(o) if o.field == "Id" && o.ascending
        ));

        let directives = parse("filter[order]=Currency desc, Id").unwrap();
        assert_eq!(directives.len(), 2);
    }

    #[test]
    fn test_order_rejects_bad_direction() {
        let err = parse("filter[order]=Id SIDEWAYS").unwrap_err();
        assert_eq!(err.key, "filter[order]");
        assert!(err.message.contains("SIDEWAYS"));
        assert!(parse("filter[order]=").is_err());
        assert!(parse("filter[order][x]=Id").is_err());
    }

    #[test]
    fn test_skip_and_limit() {
        let directives = parse("filter[skip]=20&filter[limit]=10").unwrap();
        assert!(matches!(directives[0], Directive::Skip { value: 20, .. }));
        assert!(matches!(directives[1], Directive::Limit { value: 10, .. }));
        assert!(parse("filter[skip]=-1").is_err());
        assert!(parse("filter[limit]=ten").is_err());
        assert!(parse("filter[limit][0]=10").is_err());
    }

    #[test]
    fn test_include_select_and_free_text() {
        let directives = parse(
            "query=fatefully&filter[include]=Contact&filter[include][1]=OrderItems&filter[select]=Id",
        )
        .unwrap();
        assert_eq!(directives[0], Directive::FreeText("fatefully".into()));
        assert!(matches!(&directives[1], Directive::Include { path, .. } if path == "Contact"));
        assert!(matches!(&directives[2], Directive::Include { path, .. } if path == "OrderItems"));
        assert!(matches!(&directives[3], Directive::Select { field, .. } if field == "Id"));
    }

    #[test]
    fn test_bare_key_is_rejected() {
        let err = parse("?incorrect-query").unwrap_err();
        assert_eq!(err.key, "incorrect-query");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(parse("sort=Id").is_err());
        assert!(parse("filter[page]=2").is_err());
        assert!(parse("filter=1").is_err());
        assert!(parse("query[x]=1").is_err());
    }

    #[test]
    fn test_malformed_brackets_are_rejected() {
        assert!(parse("filter[where[Name]=x").is_err());
        assert!(parse("filter[where][Name=x").is_err());
        assert!(parse("filter[where]x[Name]=x").is_err());
        assert!(parse("filter[where][]=x").is_err());
        assert!(parse("filter]where[=x").is_err());
        assert!(parse("filter[where]=x").is_err());
        assert!(parse("filter[where][Name][eq][extra]=x").is_err());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let err = parse("filter[where][Name][between]=1").unwrap_err();
        assert!(err.message.contains("between"));
    }

    #[test]
    fn test_empty_pairs_are_skipped() {
        let directives = parse("filter[skip]=1&&filter[limit]=2&").unwrap();
        assert_eq!(directives.len(), 2);
    }
}
