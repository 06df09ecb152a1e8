use anyhow::{Context, Result};
use regex::Regex;
use std::io::{IsTerminal, Read};

const FIX_ONLY_PROMPT: &str = "Fix the TODOs in the code below. If this is a flattened codebase, \
identify the file that has TODOs and only return the complete fixed version of that file. \
Do not include any explanations, headers, or markdown formatting: ";

/// Markers that start the code proper when a model wraps it in prose.
const CODE_STARTS: &[&str] = &["def ", "class ", "import ", "package ", "<?php", "<!DOCTYPE", "<html"];

/// Payload for the run: trailing words joined by spaces, else piped stdin.
/// `None` when neither is available (interactive terminal, no words).
pub fn gather_input(words: &[String]) -> Result<Option<String>> {
    if !words.is_empty() {
        return Ok(Some(words.join(" ")));
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    stdin.lock().read_to_string(&mut buf).context("reading stdin")?;
    Ok(Some(buf))
}

/// The prompt prefix sent ahead of the payload.
pub fn build_fix_prompt(base: &str, fix_only: bool, target_file: Option<&str>) -> String {
    if !fix_only {
        return base.to_string();
    }
    match target_file {
        Some(name) => format!(
            "Fix the TODOs in the file '{name}' from the codebase below. \
Only return the complete fixed version of that file, nothing else. \
Do not include any explanations, headers, or markdown formatting: "
        ),
        None => FIX_ONLY_PROMPT.to_string(),
    }
}

/// Pull the code out of a chatty answer: the longest fenced block if there is
/// one, otherwise the text with markdown headers and leading prose removed.
pub fn extract_fixed_file(output: &str) -> Result<String> {
    let fenced = Regex::new(r"```(?:\w+)?\s*([\s\S]+?)\s*```")?;
    let longest = fenced
        .captures_iter(output)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .max_by_key(|block| block.len());
    if let Some(block) = longest {
        return Ok(block.trim().to_string());
    }

    let headers = Regex::new(r"(?m)^#+ .*\n")?;
    let cleaned = headers.replace_all(output, "");
    let start = CODE_STARTS.iter().filter_map(|m| cleaned.find(m)).min().unwrap_or(0);
    Ok(cleaned[start..].trim().to_string())
}

/// Names of the files in a flattened codebase (sections introduced by
/// `# File: <name>`) whose body mentions TODO or FIXME as a whole word.
pub fn analyze_codebase_for_todos(text: &str) -> Result<Vec<String>> {
    let marker = Regex::new(r"# File: (.+)")?;
    let todo = Regex::new(r"(?i)\bTODO\b|\bFIXME\b")?;

    let headers: Vec<(String, usize, usize)> = marker
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let name = c.get(1)?.as_str().trim_end_matches('\r').to_string();
            Some((name, whole.start(), whole.end()))
        })
        .collect();

    let mut found = Vec::new();
    for (i, (name, _, body_start)) in headers.iter().enumerate() {
        let body_end = headers.get(i + 1).map(|(_, start, _)| *start).unwrap_or(text.len());
        if todo.is_match(&text[*body_start..body_end]) {
            found.push(name.clone());
        }
    }
    Ok(found)
}
