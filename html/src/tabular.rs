//! The `tabular` block.
//!
//! The body is split into cells at parse time: `&` ends a cell, `\\` ends a
//! row, `\hline` draws a rule above the row it precedes (or below the last
//! row when nothing follows it). `\multicolumn{n}{format}` and
//! `\multirow{n}{width}` apply to the cell they appear in.

use std::collections::{BTreeMap, HashMap};
use std::mem;

use hm::{
    Binding, BlockScope, CharEnv, Engine, Frame, MacroEnv, Marker, Node, ParseError, Position,
    Result, Stream, SyntaxError, Tag, handler,
};

use crate::paragraphs::RULE;

const TABLE_FORMAT: &str = "_table_format";
const MULTICOLUMN: &str = "multicolumn";
const MULTIROW: &str = "multirow";

/// CSS properties, kept sorted so output is stable.
type Style = BTreeMap<&'static str, String>;

/// Decode a column format such as `|l|cr|` into one style per column.
fn column_formats(format: &str) -> Result<Vec<Style>, String> {
    let mut columns = Vec::new();
    let mut current = Style::new();
    for c in format.chars() {
        match c {
            ' ' => {}
            '|' => {
                if current.contains_key("border-left-style") {
                    current.insert("border-left-style", "double".to_string());
                    current.insert("border-left-width", "3px".to_string());
                } else {
                    current.insert("border-left-style", "solid".to_string());
                }
            }
            'l' | 'c' | 'r' => {
                let align = match c {
                    'l' => "left",
                    'c' => "center",
                    _ => "right",
                };
                current.insert("text-align", align.to_string());
                columns.push(mem::take(&mut current));
            }
            other => {
                return Err(format!(
                    "'{}' is not a column format in '{}'",
                    other, format
                ));
            }
        }
    }
    let Some(last) = columns.last_mut() else {
        return Err(format!("column format '{}' has no columns", format));
    };
    // Rules after the last column go on its right side.
    if let Some(value) = current.get("border-left-style") {
        last.insert("border-right-style", value.clone());
    }
    if let Some(value) = current.get("border-left-width") {
        last.insert("border-right-width", value.clone());
    }
    Ok(columns)
}

/// Add a rule to the top border of a row style; a second rule makes it double.
fn add_rule(row: &mut Style) {
    if row.contains_key("border-top-style") {
        row.insert("border-top-style", "double".to_string());
        row.insert("border-top-width", "3px".to_string());
    } else {
        row.insert("border-top-style", "solid".to_string());
    }
}

struct Cell {
    content: Node,
    rowspan: usize,
    colspan: usize,
    style: Style,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            content: Node::empty(),
            rowspan: 1,
            colspan: 1,
            style: Style::new(),
        }
    }
}

fn is_blank(node: &Node) -> bool {
    node.is_empty() || node.as_literal().is_some_and(|text| text.trim().is_empty())
}

/// Read `\multicolumn` or `\multirow` arguments, which must be plain text.
fn span_arguments(
    engine: &mut Engine,
    stream: &mut dyn Stream,
    frame: &Frame<'_>,
    what: &str,
) -> Result<(usize, String)> {
    let position = stream.position();
    let count = engine.parse_argument(stream, frame, what)?;
    let count = engine.parse_static(&count, what, &position)?;
    let count = count.trim().parse::<usize>().map_err(|_| {
        ParseError::new(
            SyntaxError::Custom(format!("the {} must be a whole number", what)),
            position.clone(),
        )
    })?;
    let extra = engine.parse_argument(stream, frame, what)?;
    let extra = engine.parse_static(&extra, what, &position)?;
    Ok((count, extra))
}

fn span_tag(name: &'static str, count: usize, extra: String) -> Node {
    let payload = Node::Sequence(vec![Node::text(count.to_string()), Node::text(extra)]);
    Node::marker(Marker::Tag(Tag::with_payload(name, payload)))
}

fn multicolumn(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let (columns, format) = span_arguments(engine, stream, frame, "multicolumn span")?;
    match column_formats(&format) {
        Ok(formats) if formats.len() == 1 => Ok(span_tag(MULTICOLUMN, columns, format)),
        Ok(_) => Err(ParseError::new(
            SyntaxError::Custom("\\multicolumn needs a format for exactly one column".to_string()),
            position,
        )
        .into()),
        Err(message) => Err(ParseError::new(SyntaxError::Custom(message), position).into()),
    }
}

fn multirow(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let (rows, width) = span_arguments(engine, stream, frame, "multirow span")?;
    Ok(span_tag(MULTIROW, rows, width))
}

/// The count and text carried by a span tag.
fn span_payload(tag: &Tag) -> (usize, String) {
    let parts = match tag.payload.as_deref() {
        Some(Node::Sequence(parts)) => parts.as_slice(),
        _ => &[],
    };
    let count = parts
        .first()
        .and_then(Node::as_literal)
        .and_then(|text| text.parse().ok())
        .unwrap_or(1);
    let text = parts.get(1).and_then(Node::as_literal).unwrap_or("");
    (count, text.to_string())
}

fn column_break(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    stream.read();
    Ok(Node::marker(Marker::ColumnBreak))
}

fn stray_column_break(_: &mut Engine, stream: &mut dyn Stream, _: &Frame<'_>) -> Result<Node> {
    Err(stream
        .failure(SyntaxError::Custom("no column to break".to_string()))
        .into())
}

fn begin_tabular(
    engine: &mut Engine,
    stream: &mut dyn Stream,
    frame: &Frame<'_>,
) -> Result<(CharEnv, MacroEnv)> {
    let position = stream.position();
    let format = engine.parse_argument(stream, frame, "column format")?;
    let format = engine.parse_static(&format, "column format", &position)?;
    column_formats(&format)
        .map_err(|message| ParseError::new(SyntaxError::Custom(message), position))?;
    let chars = frame
        .chars
        .extend(HashMap::from([(Some('&'), handler(column_break))]));
    let macros = frame
        .macros
        .extend(HashMap::from([(TABLE_FORMAT.to_string(), Binding::Text(format))]));
    Ok((chars, macros))
}

/// Rows of cells with the style of each row.
struct Table {
    rows: Vec<Vec<Cell>>,
    row_styles: Vec<Style>,
}

fn split_rows(body: &Node, position: &Position) -> Result<Table> {
    let items = match body {
        Node::Sequence(items) => items.as_slice(),
        other => {
            return Ok(Table {
                rows: vec![vec![Cell {
                    content: other.clone(),
                    ..Cell::default()
                }]],
                row_styles: vec![Style::new()],
            });
        }
    };

    let mut table = Table {
        rows: Vec::new(),
        row_styles: Vec::new(),
    };
    let mut row_style = Style::new();
    let mut row: Vec<Cell> = Vec::new();
    let mut cell = Cell::default();
    for item in items {
        match item {
            Node::Marker(Marker::ColumnBreak | Marker::LineBreak) => {
                let colspan = cell.colspan;
                row.push(mem::take(&mut cell));
                // Cells covered by a multicolumn still take a slot.
                row.extend((1..colspan).map(|_| Cell::default()));
                if item.is_marker(&Marker::LineBreak) {
                    table.row_styles.push(mem::take(&mut row_style));
                    table.rows.push(mem::take(&mut row));
                }
            }
            Node::Marker(Marker::Tag(tag)) if tag.name == RULE => add_rule(&mut row_style),
            Node::Marker(Marker::Tag(tag)) if tag.name == MULTIROW => {
                cell.rowspan = span_payload(tag).0
            }
            Node::Marker(Marker::Tag(tag)) if tag.name == MULTICOLUMN => {
                let (columns, format) = span_payload(tag);
                cell.colspan = columns;
                if let Ok(formats) = column_formats(&format) {
                    for style in formats {
                        cell.style.extend(style);
                    }
                }
            }
            other => cell.content = mem::replace(&mut cell.content, Node::empty()) + other.clone(),
        }
    }

    if row.is_empty() && is_blank(&cell.content) {
        // A trailing rule closes the table from below.
        let Some(last) = table.row_styles.last_mut() else {
            return Err(ParseError::new(
                SyntaxError::Custom("tabular environment has no rows".to_string()),
                position.clone(),
            )
            .into());
        };
        if let Some(value) = row_style.get("border-top-style") {
            last.insert("border-bottom-style", value.clone());
        }
        if let Some(value) = row_style.get("border-top-width") {
            last.insert("border-bottom-width", value.clone());
        }
    } else {
        if !is_blank(&cell.content) {
            let colspan = cell.colspan;
            row.push(cell);
            row.extend((1..colspan).map(|_| Cell::default()));
        }
        if !row.is_empty() {
            table.row_styles.push(row_style);
            table.rows.push(row);
        }
    }
    Ok(table)
}

fn style_attribute(style: &Style) -> String {
    style
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn end_tabular(_: &mut Engine, scope: BlockScope, body: Node) -> Result<Node> {
    let format = scope.macros.text(TABLE_FORMAT).unwrap_or_default();
    let columns = column_formats(&format)
        .map_err(|message| ParseError::new(SyntaxError::Custom(message), scope.position.clone()))?;
    let Table { rows, row_styles } = split_rows(&body, &scope.position)?;

    let mut covered: Vec<Vec<bool>> = rows.iter().map(|row| vec![false; row.len()]).collect();
    let mut out = Node::text("<TABLE class=\"tabular\" style=\"border-collapse: collapse;\">\n");
    for (r, row) in rows.into_iter().enumerate() {
        out = out + Node::text("<TR>");
        for (c, cell) in row.into_iter().enumerate() {
            if covered[r][c] {
                continue;
            }
            let Some(column) = columns.get(c) else {
                return Err(ParseError::new(
                    SyntaxError::Custom(format!(
                        "row {} has more cells than the {} columns of '{}'",
                        r + 1,
                        columns.len(),
                        format
                    )),
                    scope.position.clone(),
                )
                .into());
            };
            let mut style = row_styles[r].clone();
            style.extend(column.clone());
            style.extend(cell.style);

            let mut spans = String::new();
            if cell.rowspan > 1 {
                for below in covered.iter_mut().skip(r + 1).take(cell.rowspan - 1) {
                    if let Some(slot) = below.get_mut(c) {
                        *slot = true;
                    }
                }
                // The bottom border comes from the last spanned row.
                if let Some(last) = row_styles.get(r + cell.rowspan - 1) {
                    for key in ["border-bottom-style", "border-bottom-width"] {
                        if let Some(value) = last.get(key) {
                            style.insert(key, value.clone());
                        }
                    }
                }
                spans.push_str(&format!("ROWSPAN={} ", cell.rowspan));
                style.insert("vertical-align", "middle".to_string());
            }
            if cell.colspan > 1 {
                for slot in covered[r].iter_mut().skip(c + 1).take(cell.colspan - 1) {
                    *slot = true;
                }
                spans.push_str(&format!("COLSPAN={} ", cell.colspan));
            }
            out = out
                + Node::text(format!("<TD {}style=\"{}\">", spans, style_attribute(&style)))
                + cell.content
                + Node::text("</TD>");
        }
        out = out + Node::text("</TR>\n");
    }
    out = out + Node::text("</TABLE>\n");
    Ok(Node::marker(Marker::Paragraph) + Node::marker(Marker::InhibitParagraph) + out)
}

pub(crate) fn install(engine: &mut Engine) {
    engine.register_char(Some('&'), handler(stray_column_break));
    engine.register_macro("&", handler(|_, _, _| Ok(Node::text("&amp;"))));
    engine.register_macro("multicolumn", handler(multicolumn));
    engine.register_macro("multirow", handler(multirow));
    engine.register_block("tabular", begin_tabular, end_tabular);
}
