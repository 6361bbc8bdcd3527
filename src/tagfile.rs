use std::io::{BufReader, Read};
use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use bcore::model::{BagObject, Tag};

use crate::lines::Lines;
use crate::summary::Summary;

static TAG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S*:)?(\s.*)?$").expect("tag line regex"));

/// Parse a BagIt `Label: value` tag file, appending every tag to `obj`.
///
/// Lines that start with whitespace continue the previous tag's value.
/// Well known tags are promoted onto the object as they are read. Returns
/// the number of tags parsed.
pub fn parse_tags<R: Read>(
    obj: &mut BagObject,
    source_file: &str,
    reader: R,
    summary: &mut Summary,
) -> usize {
    let mut current: Option<Tag> = None;
    let mut count = 0;

    for line in Lines::new(BufReader::new(reader)) {
        if summary.is_full() {
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                summary.add_error(format!("Error reading tag file '{}': {}", source_file, e));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let caps = match TAG_LINE.captures(&line) {
            Some(caps) => caps,
            None => {
                summary.add_error(format!("Unable to parse tag data from line: '{}'", line));
                continue;
            }
        };
        let label = caps
            .get(1)
            .map(|m| m.as_str().trim_end_matches(':'))
            .unwrap_or("");
        let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        if !label.is_empty() {
            if let Some(tag) = current.take() {
                obj.tags.push(tag);
                count += 1;
            }
            let tag = Tag::new(source_file, label, value);
            obj.promote(&tag);
            current = Some(tag);
            continue;
        }

        match current.as_mut() {
            Some(tag) => {
                tag.value.push(' ');
                tag.value.push_str(value);
                obj.promote(tag);
            }
            // Continuation with nothing to continue
            None => {
                summary.add_error(format!("Unable to parse tag data from line: '{}'", line));
            }
        }
    }

    if let Some(tag) = current {
        obj.tags.push(tag);
        count += 1;
    }

    debug!("{}: {} tags", source_file, count);
    count
}
