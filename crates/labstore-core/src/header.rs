//! Header codec: the textual preamble written above data rows (text and CSV
//! files) or into the sidecar file of binary data sets.
//!
//! Layout, one item per line, every line prefixed with the comment marker
//! when one is configured:
//!
//! ```text
//! # Saved Data on 30.01.2021 at 11h30m59s
//! #
//! # <notes, verbatim>
//! #
//! # Metadata:
//! # =========
//! # gain: 5
//! #
//! # Data:
//! # =====
//! # x	y
//! ```
//!
//! The notes and metadata blocks are omitted when empty. The CSV variant
//! writes the column header line without the comment marker; the sidecar
//! variant uses `Column headers:` as the section title and never comments.

use chrono::NaiveDateTime;

use crate::models::{ColumnHeaders, Metadata, MetadataValue};

pub const TITLE_PREFIX: &str = "Saved Data on ";
pub const TITLE_FORMAT: &str = "%d.%m.%Y at %Hh%Mm%Ss";

const METADATA_TITLE: &str = "Metadata:";
const METADATA_RULE: &str = "=========";

/// Separator used for column names in sidecar files.
pub const SIDECAR_DELIMITER: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVariant {
    Text,
    Csv,
    Sidecar,
}

impl FormatVariant {
    fn section(&self) -> (&'static str, &'static str) {
        match self {
            FormatVariant::Sidecar => ("Column headers:", "==============="),
            FormatVariant::Text | FormatVariant::Csv => ("Data:", "====="),
        }
    }
}

/// Everything the codec needs to know about a backend's header flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderStyle {
    pub variant: FormatVariant,
    /// Comment marker; `None` writes every line bare.
    pub comment: Option<String>,
    pub delimiter: String,
    /// Files carry a column line, so a bare numeric line after the section
    /// rule is read as column names rather than data.
    pub expects_column_line: bool,
}

impl HeaderStyle {
    pub fn text(comment: Option<&str>, delimiter: &str) -> Self {
        Self {
            variant: FormatVariant::Text,
            comment: comment.filter(|c| !c.is_empty()).map(str::to_string),
            delimiter: delimiter.to_string(),
            expects_column_line: false,
        }
    }

    pub fn csv(comment: Option<&str>) -> Self {
        Self {
            variant: FormatVariant::Csv,
            ..Self::text(comment, ",")
        }
    }

    pub fn sidecar() -> Self {
        Self {
            variant: FormatVariant::Sidecar,
            comment: None,
            delimiter: SIDECAR_DELIMITER.to_string(),
            expects_column_line: false,
        }
    }

    pub fn with_column_line(mut self, expects_column_line: bool) -> Self {
        self.expects_column_line = expects_column_line;
        self
    }

    fn prefix(&self) -> &str {
        self.comment.as_deref().unwrap_or("")
    }

    fn comments_column_line(&self) -> bool {
        self.variant == FormatVariant::Text
    }
}

/// Render a complete header, terminated by a newline.
pub fn render(
    style: &HeaderStyle,
    metadata: &Metadata,
    notes: Option<&str>,
    timestamp: NaiveDateTime,
    column_headers: Option<&ColumnHeaders>,
    include_column_line: bool,
) -> String {
    let mut lines = vec![
        format!("{TITLE_PREFIX}{}", timestamp.format(TITLE_FORMAT)),
        String::new(),
    ];

    if let Some(notes) = notes.filter(|n| !n.is_empty()) {
        lines.extend(notes.lines().map(str::to_string));
        lines.push(String::new());
    }

    if !metadata.is_empty() {
        lines.push(METADATA_TITLE.to_string());
        lines.push(METADATA_RULE.to_string());
        for (key, value) in metadata.iter() {
            lines.push(format!("{key}: {value}"));
        }
        lines.push(String::new());
    }

    let (title, rule) = style.variant.section();
    lines.push(title.to_string());
    lines.push(rule.to_string());

    let prefix = style.prefix();
    let mut header = String::new();
    for line in &lines {
        header.push_str(prefix);
        header.push_str(line);
        header.push('\n');
    }

    if let Some(headers) = column_headers.filter(|_| include_column_line) {
        if style.comments_column_line() {
            header.push_str(prefix);
        }
        header.push_str(&headers.render(&style.delimiter));
        header.push('\n');
    }
    header
}

/// A header read back from disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedHeader {
    pub timestamp: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub metadata: Metadata,
    /// The column header line as written, not yet decoded.
    pub column_line: Option<String>,
}

/// Parse the header at the top of `lines`. Returns the header and the index
/// of the first data row. Sidecar files contain no data rows.
///
/// The `Data:` section is located first; at most one column line may follow
/// it, and data starts after that.
pub fn parse(style: &HeaderStyle, lines: &[&str]) -> Result<(ParsedHeader, usize), String> {
    let prefix = style.prefix();
    let (section_title, section_rule) = style.variant.section();
    let marks = |line: &str, text: &str| line.strip_prefix(prefix) == Some(text);
    let section = (0..lines.len().saturating_sub(1))
        .rev()
        .find(|&i| marks(lines[i], section_title) && marks(lines[i + 1], section_rule))
        .ok_or_else(|| format!("missing {section_title:?} section"))?;

    let mut parsed = ParsedHeader::default();
    let mut data_start = section + 2;
    if let Some(line) = lines.get(data_start).and_then(|line| column_line(style, line)) {
        parsed.column_line = Some(line.to_string());
        data_start += 1;
    }
    if style.variant == FormatVariant::Sidecar && data_start < lines.len() {
        return Err(format!("unexpected lines after {section_title:?} section"));
    }

    let mut body: Vec<&str> = Vec::with_capacity(section);
    for (index, line) in lines[..section].iter().copied().enumerate() {
        if let Some(rest) = line.strip_prefix(prefix) {
            body.push(rest);
        } else if line == prefix.trim_end() {
            body.push("");
        } else {
            return Err(format!("line {} is not a header line", index + 1));
        }
    }

    let title = body.first().ok_or("missing header")?;
    let stamp = title
        .strip_prefix(TITLE_PREFIX)
        .ok_or_else(|| format!("unexpected title line {title:?}"))?;
    parsed.timestamp = NaiveDateTime::parse_from_str(stamp, TITLE_FORMAT).ok();

    if body.len() < 2 || !body[1].is_empty() {
        return Err("title line must be followed by a blank line".to_string());
    }
    let blocks = &body[2..];

    let (notes_block, metadata_block) = split_metadata(blocks);
    if let Some(entries) = metadata_block {
        for line in entries {
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| format!("malformed metadata line {line:?}"))?;
            parsed.metadata.insert(key, MetadataValue::parse(value));
        }
    }

    if let Some((last, notes)) = notes_block.split_last() {
        if !last.is_empty() {
            return Err("notes block must end with a blank line".to_string());
        }
        let notes = notes.join("\n");
        parsed.notes = (!notes.is_empty()).then_some(notes);
    }

    Ok((parsed, data_start))
}

/// The column line, if `line` (the first line after the section rule) is one.
/// A commented text file marks it with the comment prefix; otherwise it is
/// bare and only told apart from data when it is not numeric, unless the
/// style says a column line is always present.
fn column_line<'a>(style: &HeaderStyle, line: &'a str) -> Option<&'a str> {
    match (style.variant, style.comment.as_deref()) {
        (FormatVariant::Sidecar, _) => Some(line),
        (FormatVariant::Text, Some(prefix)) => line.strip_prefix(prefix),
        _ if line.trim().is_empty() => None,
        _ if style.expects_column_line => Some(line),
        _ => parse_row(line, &style.delimiter).is_none().then_some(line),
    }
}

/// Split the lines between title and section into (notes, metadata entries).
fn split_metadata<'a>(blocks: &'a [&'a str]) -> (&'a [&'a str], Option<&'a [&'a str]>) {
    let Some((last, _)) = blocks.split_last() else {
        return (blocks, None);
    };
    if !last.is_empty() {
        return (blocks, None);
    }
    let end = blocks.len() - 1;
    let start = (0..end.saturating_sub(1)).rev().find(|&i| {
        blocks[i] == METADATA_TITLE
            && blocks[i + 1] == METADATA_RULE
            && blocks[i + 2..end].iter().all(|l| l.contains(": "))
    });
    match start {
        Some(start) => (&blocks[..start], Some(&blocks[start + 2..end])),
        None => (blocks, None),
    }
}

/// Parse one data row. Whitespace delimiters split on any whitespace run so
/// that padded fixed-width columns read back cleanly.
pub(crate) fn parse_row(line: &str, delimiter: &str) -> Option<Vec<f64>> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }
    let fields: Vec<&str> = if delimiter.trim().is_empty() {
        line.split_whitespace().collect()
    } else {
        line.split(delimiter).collect()
    };
    fields.iter().map(|f| f.trim().parse::<f64>().ok()).collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, 30)
            .unwrap()
            .and_hms_opt(11, 30, 59)
            .unwrap()
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn test_render_text_full() {
        let style = HeaderStyle::text(Some("# "), "\t");
        let metadata = Metadata::new().with("gain", 5).with("offset", 0.25);
        let headers = ColumnHeaders::names(["x", "y"]);
        let header = render(
            &style,
            &metadata,
            Some("first line\nsecond line"),
            ts(),
            Some(&headers),
            true,
        );
        let expected = concat!(
            "# Saved Data on 30.01.2021 at 11h30m59s\n",
            "# \n",
            "# first line\n",
            "# second line\n",
            "# \n",
            "# Metadata:\n",
            "# =========\n",
            "# gain: 5\n",
            "# offset: 2.500000000000000000e-01\n",
            "# \n",
            "# Data:\n",
            "# =====\n",
            "# x\ty\n",
        );
        assert_eq!(header, expected);
    }

    #[test]
    fn test_render_minimal_without_comment() {
        let style = HeaderStyle::text(None, "\t");
        let header = render(&style, &Metadata::new(), None, ts(), None, true);
        assert_eq!(
            header,
            "Saved Data on 30.01.2021 at 11h30m59s\n\nData:\n=====\n"
        );
    }

    #[test]
    fn test_empty_comment_disables_prefix() {
        assert_eq!(HeaderStyle::text(Some(""), "\t").comment, None);
    }

    #[test]
    fn test_csv_column_line_is_bare() {
        let style = HeaderStyle::csv(Some("# "));
        let headers = ColumnHeaders::names(["a", "b"]);
        let header = render(&style, &Metadata::new(), None, ts(), Some(&headers), true);
        assert!(header.ends_with("# Data:\n# =====\na,b\n"));
    }

    #[test]
    fn test_sidecar_variant() {
        let style = HeaderStyle::sidecar();
        let headers = ColumnHeaders::names(["t", "counts"]);
        let metadata = Metadata::new().with("binning", 4);
        let header = render(&style, &metadata, None, ts(), Some(&headers), true);
        assert!(header.contains("\nColumn headers:\n===============\nt, counts\n"));
        assert!(header.contains("\nbinning: 4\n"));
        assert!(!header.contains('#'));
    }

    #[test]
    fn test_column_line_can_be_suppressed() {
        let style = HeaderStyle::text(Some("# "), "\t");
        let headers = ColumnHeaders::Raw("x y".into());
        let header = render(&style, &Metadata::new(), None, ts(), Some(&headers), false);
        assert!(header.ends_with("# =====\n"));
    }

    #[test]
    fn test_parse_inverts_render() {
        let style = HeaderStyle::text(Some("# "), "\t");
        let metadata = Metadata::new()
            .with("gain", 5)
            .with("offset", -1.5e-9)
            .with("sample", "NV center 3");
        let headers = ColumnHeaders::names(["x", "y"]);
        let notes = Some("line one\n\nline three");
        let mut text = render(&style, &metadata, notes, ts(), Some(&headers), true);
        text.push_str("1.0\t2.0\n3.0\t4.0\n");

        let all = lines(&text);
        let (parsed, data_start) = parse(&style, &all).unwrap();
        assert_eq!(parsed.timestamp, Some(ts()));
        assert_eq!(parsed.notes.as_deref(), Some("line one\n\nline three"));
        assert_eq!(parsed.metadata, metadata);
        assert_eq!(parsed.column_line.as_deref(), Some("x\ty"));
        assert_eq!(&all[data_start..], ["1.0\t2.0", "3.0\t4.0"]);
    }

    #[test]
    fn test_parse_csv_bare_column_line() {
        let style = HeaderStyle::csv(Some("# "));
        let headers = ColumnHeaders::names(["a", "b"]);
        let metadata = Metadata::new().with("k", 1);
        let mut text = render(&style, &metadata, None, ts(), Some(&headers), true);
        text.push_str("1,2\n");

        let all = lines(&text);
        let (parsed, data_start) = parse(&style, &all).unwrap();
        assert_eq!(parsed.column_line.as_deref(), Some("a,b"));
        assert_eq!(parsed.notes, None);
        assert_eq!(data_start, all.len() - 1);
    }

    #[test]
    fn test_parse_numeric_column_line() {
        let headers = ColumnHeaders::names(["400", "500"]);
        for style in [HeaderStyle::csv(Some("# ")), HeaderStyle::text(None, "\t")] {
            let mut text = render(&style, &Metadata::new(), None, ts(), Some(&headers), true);
            text.push_str(&format!("1{}2\n", style.delimiter));
            let all = lines(&text);

            let (parsed, data_start) = parse(&style.clone().with_column_line(true), &all).unwrap();
            assert_eq!(parsed.column_line, Some(headers.render(&style.delimiter)));
            assert_eq!(data_start, all.len() - 1);

            let (parsed, data_start) = parse(&style, &all).unwrap();
            assert_eq!(parsed.column_line, None);
            assert_eq!(data_start, all.len() - 2);
        }
    }

    #[test]
    fn test_parse_commented_numeric_column_line() {
        let style = HeaderStyle::text(Some("# "), "\t");
        let headers = ColumnHeaders::names(["1", "2"]);
        let mut text = render(&style, &Metadata::new(), None, ts(), Some(&headers), true);
        text.push_str("3\t4\n");
        let all = lines(&text);
        let (parsed, data_start) = parse(&style, &all).unwrap();
        assert_eq!(parsed.column_line.as_deref(), Some("1\t2"));
        assert_eq!(&all[data_start..], ["3\t4"]);
    }

    #[test]
    fn test_parse_uncommented_text() {
        let style = HeaderStyle::text(None, " ");
        let headers = ColumnHeaders::names(["u", "v"]);
        let mut text = render(&style, &Metadata::new(), Some("a note"), ts(), Some(&headers), true);
        text.push_str("1 2\n");

        let all = lines(&text);
        let (parsed, _) = parse(&style, &all).unwrap();
        assert_eq!(parsed.notes.as_deref(), Some("a note"));
        assert_eq!(parsed.column_line.as_deref(), Some("u v"));
    }

    #[test]
    fn test_parse_sidecar() {
        let style = HeaderStyle::sidecar();
        let metadata = Metadata::new().with("rate", 2.0);
        let text = render(&style, &metadata, Some("notes"), ts(), None, true);
        let (parsed, data_start) = parse(&style, &lines(&text)).unwrap();
        assert_eq!(parsed.metadata, metadata);
        assert_eq!(parsed.notes.as_deref(), Some("notes"));
        assert_eq!(parsed.column_line, None);
        assert_eq!(data_start, lines(&text).len());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let style = HeaderStyle::text(Some("# "), "\t");
        assert!(parse(&style, &["hello world", "1\t2"]).is_err());
        assert!(parse(&style, &["# Saved Data on 30.01.2021 at 11h30m59s", "# "]).is_err());
        assert!(parse(&style, &[]).is_err());
    }

    #[test]
    fn test_parse_row() {
        assert_eq!(parse_row("1.5\t-2e3", "\t"), Some(vec![1.5, -2000.0]));
        assert_eq!(parse_row("   1.50     2.00", " "), Some(vec![1.5, 2.0]));
        assert_eq!(parse_row("1,x", ","), None);
        assert_eq!(parse_row("", ","), None);
        assert_eq!(parse_row("nan,inf", ",").map(|r| r.len()), Some(2));
    }
}
