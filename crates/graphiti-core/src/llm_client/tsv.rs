/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Parser for the tab-separated reply protocol used by per-sibling reconciliation
//! prompts (C7): the model may preface its reply with a `<think>...</think>` block,
//! rows are tab-separated with no header, and the reply is only considered complete
//! once it ends with a blank line.

/// A reply that doesn't end in a blank line is still mid-stream (or was truncated);
/// the caller should treat it as an incomplete response and request a continuation.
pub fn is_complete(raw: &str) -> bool {
    raw.trim_end_matches([' ', '\t']).ends_with('\n') && !raw.trim().is_empty()
        || raw.ends_with("\n\n")
}

/// Strip a leading `<think>...</think>` block, if present.
fn strip_think(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<think>") {
        if let Some(end) = rest.find("</think>") {
            return rest[end + "</think>".len()..].trim_start();
        }
    }
    trimmed
}

/// Parse a TSV reply into rows of tab-separated fields.
///
/// - Strips a leading `<think>...</think>` block.
/// - Drops a trailing partial line (the end-of-reply marker is a blank final line;
///   anything after the last blank line that isn't itself blank is incomplete and
///   dropped rather than parsed as a half-written row).
/// - Blank lines are otherwise skipped.
pub fn parse_rows(raw: &str) -> Vec<Vec<String>> {
    let body = strip_think(raw);

    let mut lines: Vec<&str> = body.lines().collect();
    if let Some(last) = lines.last() {
        if !last.trim().is_empty() {
            lines.pop();
        }
    }

    lines
        .into_iter()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split('\t').map(|field| field.trim().to_string()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_think_block() {
        let raw = "<think>reasoning here</think>\nuuid1\tduplicate\tKNOWS\n\n";
        let rows = parse_rows(raw);
        assert_eq!(rows, vec![vec!["uuid1".to_string(), "duplicate".to_string(), "KNOWS".to_string()]]);
    }

    #[test]
    fn test_drops_trailing_partial_line() {
        let raw = "uuid1\tduplicate\tKNOWS\nuuid2\tcontr";
        let rows = parse_rows(raw);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_is_complete_requires_trailing_blank_line() {
        assert!(!is_complete("uuid1\tduplicate\tKNOWS"));
        assert!(is_complete("uuid1\tduplicate\tKNOWS\n\n"));
    }
}
