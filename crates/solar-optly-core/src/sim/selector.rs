//! Compound CSS selectors for the simulated document: tag, `#id`, `.class`,
//! attribute conditions, descendant and child combinators, comma groups.

use crate::host::HostError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
    StartsWith { key: String, value: String },
    EndsWith { key: String, value: String },
    Contains { key: String, value: String },
}

impl AttrCondition {
    pub(crate) fn key(&self) -> &str {
        match self {
            AttrCondition::Exists { key }
            | AttrCondition::Eq { key, .. }
            | AttrCondition::StartsWith { key, .. }
            | AttrCondition::EndsWith { key, .. }
            | AttrCondition::Contains { key, .. } => key,
        }
    }

    pub(crate) fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self {
            AttrCondition::Exists { .. } => true,
            AttrCondition::Eq { value, .. } => actual == value,
            AttrCondition::StartsWith { value, .. } => !value.is_empty() && actual.starts_with(value.as_str()),
            AttrCondition::EndsWith { value, .. } => !value.is_empty() && actual.ends_with(value.as_str()),
            AttrCondition::Contains { value, .. } => !value.is_empty() && actual.contains(value.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SelectorStep {
    pub(crate) tag: Option<String>,
    pub(crate) universal: bool,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<AttrCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorPart {
    pub(crate) step: SelectorStep,
    // Relation to the part on the left.
    pub(crate) combinator: Option<Combinator>,
}

fn unsupported(selector: &str) -> HostError {
    HostError::InvalidSelector(selector.to_string())
}

pub(crate) fn parse_selector_groups(selector: &str) -> Result<Vec<Vec<SelectorPart>>, HostError> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                bracket_depth = bracket_depth.checked_sub(1).ok_or_else(|| unsupported(selector))?;
                current.push(ch);
            }
            ',' if bracket_depth == 0 => {
                groups.push(parse_selector_chain(&current)?);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if bracket_depth != 0 {
        return Err(unsupported(selector));
    }
    groups.push(parse_selector_chain(&current)?);
    Ok(groups)
}

pub(crate) fn parse_selector_chain(selector: &str) -> Result<Vec<SelectorPart>, HostError> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(unsupported(selector));
    }

    let mut parts = Vec::new();
    let mut pending: Option<Combinator> = None;
    for token in tokenize_selector(selector)? {
        if token == ">" {
            if pending.is_some() || parts.is_empty() {
                return Err(unsupported(selector));
            }
            pending = Some(Combinator::Child);
            continue;
        }

        let step = parse_selector_step(&token)?;
        let combinator = if parts.is_empty() {
            None
        } else {
            Some(pending.take().unwrap_or(Combinator::Descendant))
        };
        parts.push(SelectorPart { step, combinator });
    }

    if parts.is_empty() || pending.is_some() {
        return Err(unsupported(selector));
    }
    Ok(parts)
}

fn tokenize_selector(selector: &str) -> Result<Vec<String>, HostError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if !current.trim().is_empty() {
            tokens.push(current.trim().to_string());
        }
        current.clear();
    };

    for ch in selector.chars() {
        match ch {
            '[' => {
                in_brackets = true;
                current.push(ch);
            }
            ']' => {
                in_brackets = false;
                current.push(ch);
            }
            '>' if !in_brackets => {
                flush(&mut current, &mut tokens);
                tokens.push(">".to_string());
            }
            ch if ch.is_ascii_whitespace() && !in_brackets => flush(&mut current, &mut tokens),
            _ => current.push(ch),
        }
    }
    if in_brackets {
        return Err(unsupported(selector));
    }
    flush(&mut current, &mut tokens);
    Ok(tokens)
}

fn parse_selector_step(part: &str) -> Result<SelectorStep, HostError> {
    let bytes = part.as_bytes();
    let mut i = 0usize;
    let mut step = SelectorStep::default();

    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                step.universal = true;
                i += 1;
            }
            b'#' => {
                let (id, next) = parse_ident(part, i + 1).ok_or_else(|| unsupported(part))?;
                if step.id.replace(id).is_some() {
                    return Err(unsupported(part));
                }
                i = next;
            }
            b'.' => {
                let (class, next) = parse_ident(part, i + 1).ok_or_else(|| unsupported(part))?;
                step.classes.push(class);
                i = next;
            }
            b'[' => {
                let (condition, next) = parse_attr_condition(part, i)?;
                step.attrs.push(condition);
                i = next;
            }
            _ => {
                if step.tag.is_some() || step.id.is_some() || !step.classes.is_empty() || step.universal {
                    return Err(unsupported(part));
                }
                let (tag, next) = parse_ident(part, i).ok_or_else(|| unsupported(part))?;
                step.tag = Some(tag.to_ascii_uppercase());
                i = next;
            }
        }
    }
    Ok(step)
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn parse_ident(src: &str, start: usize) -> Option<(String, usize)> {
    let bytes = src.as_bytes();
    if start >= bytes.len() || !is_ident_char(bytes[start]) {
        return None;
    }
    let mut end = start + 1;
    while end < bytes.len() && is_ident_char(bytes[end]) {
        end += 1;
    }
    Some((src.get(start..end)?.to_string(), end))
}

fn parse_attr_condition(src: &str, open: usize) -> Result<(AttrCondition, usize), HostError> {
    let close = src[open..]
        .find(']')
        .map(|offset| open + offset)
        .ok_or_else(|| unsupported(src))?;
    let body = src[open + 1..close].trim();

    let operators = [("^=", 0u8), ("$=", 1), ("*=", 2), ("=", 3)];
    let Some((op, kind, position)) = operators
        .iter()
        .find_map(|(op, kind)| body.find(op).map(|position| (*op, *kind, position)))
    else {
        if body.is_empty() || !body.bytes().all(is_ident_char) {
            return Err(unsupported(src));
        }
        return Ok((
            AttrCondition::Exists {
                key: body.to_ascii_lowercase(),
            },
            close + 1,
        ));
    };

    let key = body[..position].trim().to_ascii_lowercase();
    if key.is_empty() || !key.bytes().all(is_ident_char) {
        return Err(unsupported(src));
    }
    let raw = body[position + op.len()..].trim();
    let value = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')))
        .unwrap_or(raw)
        .to_string();

    let condition = match kind {
        0 => AttrCondition::StartsWith { key, value },
        1 => AttrCondition::EndsWith { key, value },
        2 => AttrCondition::Contains { key, value },
        _ => AttrCondition::Eq { key, value },
    };
    Ok((condition, close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_row_selector() {
        let groups =
            parse_selector_groups("div.vc_row.wpb_row.vc_row-fluid").expect("selector parses");
        let [chain] = groups.as_slice() else {
            panic!("expected one group");
        };
        assert_eq!(chain[0].step.tag.as_deref(), Some("DIV"));
        assert_eq!(chain[0].step.classes, vec!["vc_row", "wpb_row", "vc_row-fluid"]);
    }

    #[test]
    fn parses_prefix_attribute_and_combinators() {
        let groups = parse_selector_groups(".wrapper > iframe[id^=\"mvfFormWidget-\"], [data-x]")
            .expect("selector parses");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][1].combinator, Some(Combinator::Child));
        assert_eq!(
            groups[0][1].step.attrs,
            vec![AttrCondition::StartsWith {
                key: "id".to_string(),
                value: "mvfFormWidget-".to_string()
            }]
        );
        assert_eq!(groups[1][0].step.attrs[0].key(), "data-x");
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert!(parse_selector_groups("").is_err());
        assert!(parse_selector_groups("div >").is_err());
        assert!(parse_selector_groups("iframe[id^=").is_err());
        assert!(parse_selector_groups("a:hover").is_err());
    }
}
