//! Range-list expansion and re-folding
//!
//! A range list is the bracketed part of a node pattern: a comma-separated
//! list of integers or hyphenated integer pairs, e.g. `1-3,7,10-12`.
//! Numeric padding in an endpoint is preserved on expansion, so `08-10`
//! yields `08`, `09`, `10`.

use crate::core::error::{Error, Result};

/// Expand a range list (bracket contents, without the brackets)
pub fn expand_range_list(list: &str, position: usize) -> Result<Vec<String>> {
    if list.is_empty() {
        return Err(Error::Parse {
            position,
            message: "empty range list".to_string(),
        });
    }

    let mut out = Vec::new();
    for item in list.split(',') {
        match item.split_once('-') {
            Some((start, end)) => {
                let (first, width_a) = parse_endpoint(start, position)?;
                let (last, width_b) = parse_endpoint(end, position)?;
                if first > last {
                    return Err(Error::Parse {
                        position,
                        message: format!("reversed range '{item}'"),
                    });
                }
                let width = width_a.max(width_b);
                for n in first..=last {
                    out.push(format_padded(n, width));
                }
            }
            None => {
                let (n, width) = parse_endpoint(item, position)?;
                out.push(format_padded(n, width));
            }
        }
    }
    Ok(out)
}

/// Parse one endpoint, returning its value and explicit padding width
/// (0 when the endpoint carries no leading zero)
fn parse_endpoint(text: &str, position: usize) -> Result<(u64, usize)> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Parse {
            position,
            message: format!("invalid range endpoint '{text}'"),
        });
    }
    let value: u64 = text.parse().map_err(|_| Error::Parse {
        position,
        message: format!("range endpoint '{text}' out of range"),
    })?;
    let width = if has_leading_zero(text) { text.len() } else { 0 };
    Ok((value, width))
}

fn format_padded(n: u64, width: usize) -> String {
    if width > 0 {
        format!("{n:0width$}")
    } else {
        n.to_string()
    }
}

fn has_leading_zero(text: &str) -> bool {
    text.len() > 1 && text.starts_with('0')
}

/// One member of a fold group: the numeric suffix split out of a node name
#[derive(Debug)]
struct Member {
    value: u64,
    text: String,
}

/// Fold node names back into compact range form.
///
/// Names are grouped by their invariant prefix/suffix around the last
/// numeric run; consecutive values with compatible padding collapse into
/// `a-b` items. Names without a numeric run (or with a run too large for
/// u64) pass through untouched.
pub fn fold(names: &[&str]) -> String {
    let mut groups: Vec<(String, String, Vec<Member>)> = Vec::new();
    let mut plain: Vec<&str> = Vec::new();

    for name in names {
        match split_numeric_suffix(name) {
            Some((head, digits, tail)) => {
                let member = Member {
                    value: digits.parse().expect("digit run fits u64"),
                    text: digits.to_string(),
                };
                match groups
                    .iter_mut()
                    .find(|(h, t, _)| h == head && t == tail)
                {
                    Some((_, _, members)) => members.push(member),
                    None => groups.push((head.to_string(), tail.to_string(), vec![member])),
                }
            }
            None => plain.push(name),
        }
    }

    let mut rendered: Vec<String> = plain.iter().map(|s| s.to_string()).collect();
    for (head, tail, mut members) in groups {
        members.sort_by(|a, b| a.value.cmp(&b.value));
        let items = fold_members(&members);
        if items.len() == 1 && !items[0].contains('-') {
            rendered.push(format!("{head}{}{tail}", items[0]));
        } else {
            rendered.push(format!("{head}[{}]{tail}", items.join(",")));
        }
    }

    rendered.sort();
    rendered.join(",")
}

/// Split a name around its last maximal digit run, provided the run fits u64
fn split_numeric_suffix(name: &str) -> Option<(&str, &str, &str)> {
    let bytes = name.as_bytes();
    let mut end = bytes.len();
    while end > 0 && !bytes[end - 1].is_ascii_digit() {
        end -= 1;
    }
    if end == 0 {
        return None;
    }
    let mut start = end;
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    let digits = &name[start..end];
    if digits.parse::<u64>().is_err() {
        return None;
    }
    Some((&name[..start], digits, &name[end..]))
}

/// Collapse sorted members into range-list items
fn fold_members(members: &[Member]) -> Vec<String> {
    let mut items = Vec::new();
    let mut i = 0;
    while i < members.len() {
        let mut width = run_width(&members[i].text);
        let mut j = i;
        while j + 1 < members.len() {
            let next = &members[j + 1];
            if next.value != members[j].value + 1 {
                break;
            }
            match (width, run_width(&next.text)) {
                // Unpadded run so far: the next member fixes the width only
                // if it carries a leading zero
                (None, Some(w)) if members[i..=j].iter().all(|m| m.text.len() == w) => {
                    width = Some(w);
                }
                (None, None) => {}
                (Some(w), _) if next.text.len() == w => {}
                _ => break,
            }
            j += 1;
        }
        let first = &members[i];
        let last = &members[j];
        let w = width.unwrap_or(0);
        if i == j {
            items.push(format_padded(first.value, w.max(run_width(&first.text).unwrap_or(0))));
        } else {
            items.push(format!(
                "{}-{}",
                format_padded(first.value, w),
                format_padded(last.value, w)
            ));
        }
        i = j + 1;
    }
    items
}

fn run_width(text: &str) -> Option<usize> {
    if has_leading_zero(text) {
        Some(text.len())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_single_values() {
        assert_eq!(expand_range_list("5", 0).unwrap(), vec!["5"]);
        assert_eq!(expand_range_list("1,3,7", 0).unwrap(), vec!["1", "3", "7"]);
    }

    #[test]
    fn test_expand_pairs() {
        assert_eq!(expand_range_list("1-3", 0).unwrap(), vec!["1", "2", "3"]);
        assert_eq!(
            expand_range_list("10-12,50", 0).unwrap(),
            vec!["10", "11", "12", "50"]
        );
    }

    #[test]
    fn test_expand_preserves_padding() {
        assert_eq!(
            expand_range_list("08-10", 0).unwrap(),
            vec!["08", "09", "10"]
        );
        assert_eq!(expand_range_list("007", 0).unwrap(), vec!["007"]);
    }

    #[test]
    fn test_expand_rejects_garbage() {
        assert!(expand_range_list("", 0).is_err());
        assert!(expand_range_list("a-b", 0).is_err());
        assert!(expand_range_list("3-1", 0).is_err());
        assert!(expand_range_list("1,", 0).is_err());
        assert!(expand_range_list("1--3", 0).is_err());
    }

    #[test]
    fn test_fold_consecutive() {
        assert_eq!(fold(&["host1", "host2", "host3"]), "host[1-3]");
    }

    #[test]
    fn test_fold_with_suffix_and_gaps() {
        assert_eq!(
            fold(&["web1.d", "web2.d", "web3.d", "web7.d"]),
            "web[1-3,7].d"
        );
    }

    #[test]
    fn test_fold_padded() {
        assert_eq!(fold(&["host08", "host09", "host10"]), "host[08-10]");
    }

    #[test]
    fn test_fold_singletons_stay_plain() {
        assert_eq!(fold(&["host5"]), "host5");
        assert_eq!(fold(&["alpha", "beta"]), "alpha,beta");
    }

    #[test]
    fn test_fold_separate_groups() {
        assert_eq!(
            fold(&["db1", "db2", "web1", "web2"]),
            "db[1-2],web[1-2]"
        );
    }

    #[test]
    fn test_fold_incompatible_padding_splits_runs() {
        // 9 -> 10 is consecutive but "09" fixes width 2 while "10" keeps it
        assert_eq!(fold(&["n09", "n10"]), "n[09-10]");
        // width 2 cannot absorb a three-digit neighbour
        assert_eq!(fold(&["n099", "n100"]), "n[099-100]");
    }
}
