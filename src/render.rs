use serde::Serialize;

use crate::rank::CandidateModel;

const DESCRIPTION_CHARS: usize = 135;

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize json: {}", e),
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ErrorOut<'a> {
    pub code: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'a str>,
}

pub fn print_json_error(code: &str, message: &str, hint: Option<&str>) {
    let err = ErrorOut { code, message, hint };
    print_json(&err);
}

/// Byte count in binary units with two decimals; zero is `0B`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }
    format!("{:.2} {}", size, UNITS[unit_index])
}

fn price(p: Option<f64>) -> String {
    p.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn description(text: Option<&str>) -> String {
    let flat = text.unwrap_or_default().replace(['\r', '\n'], " ");
    if flat.chars().count() > DESCRIPTION_CHARS {
        let mut cut: String = flat.chars().take(DESCRIPTION_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        flat
    }
}

/// Left-aligned columns joined by ` | `, a dashed rule under the header.
/// The last column is left unpadded when `pad_last` is false.
fn table(headers: &[&str], rows: &[Vec<String>], pad_last: bool) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    let measured = if pad_last { widths.len() } else { widths.len() - 1 };
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(measured) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i < measured {
                    format!("{:<w$}", c, w = widths[i])
                } else {
                    c.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" | ")
    };
    let header = line(headers.to_vec());
    let mut out = String::new();
    out.push_str(&header);
    out.push('\n');
    out.push_str(&"-".repeat(header.chars().count()));
    out.push('\n');
    for row in rows {
        out.push_str(line(row.iter().map(String::as_str).collect()).trim_end());
        out.push('\n');
    }
    out
}

/// `Model ID | Context | Prompt | Completion | Description`
pub fn remote_catalog_table(models: &[&CandidateModel]) -> String {
    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|m| {
            vec![
                m.id.clone(),
                m.context_length.to_string(),
                price(m.prompt_price),
                price(m.completion_price),
                description(m.description.as_deref()),
            ]
        })
        .collect();
    table(&["Model ID", "Context", "Prompt", "Completion", "Description"], &rows, false)
}

/// `Name | Size | Modified | Family`
pub fn local_catalog_table(models: &[CandidateModel]) -> String {
    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|m| {
            vec![
                m.id.clone(),
                format_size(m.size_bytes.unwrap_or(0)),
                m.modified.clone().unwrap_or_default(),
                m.family.clone().unwrap_or_default(),
            ]
        })
        .collect();
    table(&["Name", "Size", "Modified", "Family"], &rows, true)
}
