//! Bulk export of the filtered rows over the visible columns.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::columns::ColumnDescriptor;
use super::dataset::Row;
use super::value::{CellValue, format_number};
use crate::domain::SheetError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const SHEET_NAME_MAX: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Tsv,
    Json,
    SpreadsheetXml,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Csv,
        ExportFormat::Tsv,
        ExportFormat::Json,
        ExportFormat::SpreadsheetXml,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Json => "json",
            ExportFormat::SpreadsheetXml => "xls",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv;charset=utf-8",
            ExportFormat::Tsv => "text/tab-separated-values;charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::SpreadsheetXml => "application/vnd.ms-excel",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Json => "json",
            ExportFormat::SpreadsheetXml => "xml",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "tsv" => Ok(ExportFormat::Tsv),
            "json" => Ok(ExportFormat::Json),
            "xml" | "xls" | "excel" => Ok(ExportFormat::SpreadsheetXml),
            other => {
                let known: Vec<String> = ExportFormat::ALL.iter().map(|f| f.to_string()).collect();
                Err(format!("unknown export format '{other}' ({})", known.join(", ")))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub content: Vec<u8>,
    pub mime_type: &'static str,
    pub suggested_filename: String,
}

/// Rows and columns to export, already filtered and ordered by the caller.
pub struct ExportJob<'a> {
    pub rows: Vec<&'a Row>,
    pub columns: Vec<&'a ColumnDescriptor>,
    pub format: ExportFormat,
    pub filename_base: String,
}

impl ExportJob<'_> {
    /// Returns `None` when there is nothing to export.
    pub fn serialize(&self, date: NaiveDate) -> Result<Option<ExportFile>, SheetError> {
        if self.rows.is_empty() || self.columns.is_empty() {
            return Ok(None);
        }
        let content = match self.format {
            ExportFormat::Csv => self.to_csv()?,
            ExportFormat::Tsv => self.to_tsv(),
            ExportFormat::Json => self.to_json()?,
            ExportFormat::SpreadsheetXml => self.to_spreadsheet_xml(),
        };
        Ok(Some(ExportFile {
            content,
            mime_type: self.format.mime_type(),
            suggested_filename: export_filename(&self.filename_base, date, self.format),
        }))
    }

    fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.header.as_str())
    }

    fn cells<'r>(&self, row: &'r Row) -> impl Iterator<Item = &'r CellValue> {
        self.columns.iter().map(move |c| row.get(&c.accessor_key))
    }

    fn to_csv(&self) -> Result<Vec<u8>, SheetError> {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Necessary)
            .from_writer(UTF8_BOM.to_vec());
        writer.write_record(self.headers())?;
        for row in &self.rows {
            writer.write_record(self.cells(row).map(CellValue::display))?;
        }
        writer
            .into_inner()
            .map_err(|e| SheetError::IoError(e.into_error()))
    }

    fn to_tsv(&self) -> Vec<u8> {
        let clean = |s: &str| s.replace("\r\n", " ").replace(['\t', '\n', '\r'], " ");
        let mut out = String::new();
        out.push_str(&self.headers().map(clean).collect::<Vec<_>>().join("\t"));
        out.push('\n');
        for row in &self.rows {
            let line: Vec<String> = self.cells(row).map(|v| clean(&v.display())).collect();
            out.push_str(&line.join("\t"));
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Object keys for JSON records. Columns sharing a header get their
    /// accessor key appended, otherwise one would overwrite the other.
    fn json_keys(&self) -> Vec<String> {
        let mut header_count: HashMap<&str, usize> = HashMap::new();
        for column in &self.columns {
            *header_count.entry(column.header.as_str()).or_insert(0) += 1;
        }
        self.columns
            .iter()
            .map(|column| match header_count.get(column.header.as_str()) {
                Some(&n) if n > 1 => format!("{} ({})", column.header, column.accessor_key),
                _ => column.header.clone(),
            })
            .collect()
    }

    fn to_json(&self) -> Result<Vec<u8>, SheetError> {
        let keys = self.json_keys();
        let records: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = keys
                    .iter()
                    .zip(self.cells(row))
                    .map(|(key, value)| (key.clone(), json_value(value)))
                    .collect();
                Value::Object(object)
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&records)?)
    }

    fn to_spreadsheet_xml(&self) -> Vec<u8> {
        let sheet_name: String = self.filename_base.chars().take(SHEET_NAME_MAX).collect();
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<?mso-application progid=\"Excel.Sheet\"?>\n");
        out.push_str(
            "<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
             xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n",
        );
        out.push_str(" <Styles>\n");
        out.push_str("  <Style ss:ID=\"header\"><Font ss:Bold=\"1\"/></Style>\n");
        out.push_str(" </Styles>\n");
        let sheet_name = xml_escape(&sheet_name);
        out.push_str(&format!(" <Worksheet ss:Name=\"{sheet_name}\">\n  <Table>\n"));

        out.push_str("   <Row>");
        for header in self.headers() {
            out.push_str(&format!(
                "<Cell ss:StyleID=\"header\"><Data ss:Type=\"String\">{}</Data></Cell>",
                xml_escape(header)
            ));
        }
        out.push_str("</Row>\n");

        for row in &self.rows {
            out.push_str("   <Row>");
            for value in self.cells(row) {
                let kind = match value {
                    CellValue::Number(_) => "Number",
                    _ => "String",
                };
                out.push_str(&format!(
                    "<Cell><Data ss:Type=\"{kind}\">{}</Data></Cell>",
                    xml_escape(&value.display())
                ));
            }
            out.push_str("</Row>\n");
        }

        out.push_str("  </Table>\n </Worksheet>\n</Workbook>\n");
        out.into_bytes()
    }
}

fn json_value(value: &CellValue) -> Value {
    match value {
        CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Value::from(*n as i64),
        CellValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(format_number(*n))),
        other => Value::String(other.display()),
    }
}

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// `{label}_{YYYY-MM-DD}.{ext}` with path separators removed from the label.
pub fn export_filename(label: &str, date: NaiveDate, format: ExportFormat) -> String {
    let base: String = label
        .trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let base = if base.is_empty() {
        "export".to_string()
    } else {
        base
    };
    let date = date.format("%Y-%m-%d");
    format!("{base}_{date}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 15).unwrap()
    }

    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("name", "Full name"),
            ColumnDescriptor::new("paid", "Fees paid"),
            ColumnDescriptor::new("room", "Room"),
        ]
    }

    fn rows() -> Vec<Row> {
        vec![
            Row::new()
                .with("name", "Smith, John")
                .with("paid", true)
                .with("room", 101_i64),
            Row::new()
                .with("name", "Ann \"Annie\" Lee")
                .with("paid", false),
            Row::new()
                .with("name", "Tab\there\nnewline")
                .with("room", 3.5),
        ]
    }

    fn job<'a>(
        rows: &'a [Row],
        cols: &'a [ColumnDescriptor],
        format: ExportFormat,
    ) -> ExportJob<'a> {
        ExportJob {
            rows: rows.iter().collect(),
            columns: cols.iter().collect(),
            format,
            filename_base: "Aravali Hostel".to_string(),
        }
    }

    fn export(rows: &[Row], cols: &[ColumnDescriptor], format: ExportFormat) -> ExportFile {
        job(rows, cols, format).serialize(date()).unwrap().unwrap()
    }

    #[test]
    fn csv_round_trips_through_a_reader() {
        let (rows, cols) = (rows(), columns());
        let file = export(&rows, &cols, ExportFormat::Csv);
        assert!(file.content.starts_with(UTF8_BOM));
        assert_eq!(file.suggested_filename, "Aravali_Hostel_2024-08-15.csv");
        assert_eq!(file.mime_type, "text/csv;charset=utf-8");

        let text = String::from_utf8(file.content[UTF8_BOM.len()..].to_vec()).unwrap();
        assert!(text.contains("\"Smith, John\""));

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["Full name", "Fees paid", "Room"]);
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[0][0], "Smith, John");
        assert_eq!(&records[0][1], "Yes");
        assert_eq!(&records[0][2], "101");
        assert_eq!(&records[1][0], "Ann \"Annie\" Lee");
        assert_eq!(&records[1][2], "");
        assert_eq!(&records[2][0], "Tab\there\nnewline");
    }

    #[test]
    fn tsv_flattens_tabs_and_newlines() {
        let (rows, cols) = (rows(), columns());
        let file = export(&rows, &cols, ExportFormat::Tsv);
        let text = String::from_utf8(file.content).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Full name\tFees paid\tRoom");
        assert_eq!(lines[3], "Tab here newline\t\t3.5");
        assert!(lines.iter().all(|l| l.split('\t').count() == 3));
    }

    #[test]
    fn json_is_keyed_by_header() {
        let (rows, cols) = (rows(), columns());
        let file = export(&rows, &cols, ExportFormat::Json);
        let parsed: Value = serde_json::from_slice(&file.content).unwrap();
        let records = parsed.as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["Full name"], "Smith, John");
        assert_eq!(records[0]["Fees paid"], "Yes");
        assert_eq!(records[0]["Room"], 101);
        assert_eq!(records[1]["Fees paid"], "No");
        assert_eq!(records[1]["Room"], "");
        assert!(records[0].get("name").is_none());
        let keys: Vec<&String> = records[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["Full name", "Fees paid", "Room"]);
    }

    #[test]
    fn json_keeps_columns_sharing_a_header() {
        let cols = vec![
            ColumnDescriptor::new("phone", "Phone"),
            ColumnDescriptor::new("guardian_phone", "Phone"),
            ColumnDescriptor::new("name", "Name"),
        ];
        let rows = vec![
            Row::new()
                .with("phone", "111")
                .with("guardian_phone", "222")
                .with("name", "Jane Doe"),
        ];
        let file = export(&rows, &cols, ExportFormat::Json);
        let parsed: Value = serde_json::from_slice(&file.content).unwrap();
        let record = parsed[0].as_object().unwrap();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, ["Phone (phone)", "Phone (guardian_phone)", "Name"]);
        assert_eq!(record["Phone (phone)"], "111");
        assert_eq!(record["Phone (guardian_phone)"], "222");
    }

    #[test]
    fn spreadsheet_xml_escapes_every_cell() {
        let cols = vec![ColumnDescriptor::new("name", "Name <&>")];
        let rows = vec![Row::new().with("name", "O'Neil & \"Sons\" <x>")];
        let file = export(&rows, &cols, ExportFormat::SpreadsheetXml);
        let text = String::from_utf8(file.content).unwrap();
        assert!(text.contains("<Data ss:Type=\"String\">Name &lt;&amp;&gt;</Data>"));
        assert!(text.contains("O&apos;Neil &amp; &quot;Sons&quot; &lt;x&gt;"));
        assert!(text.contains("<Font ss:Bold=\"1\"/>"));
        assert_eq!(text.matches("<Row>").count(), 2);
        assert!(file.suggested_filename.ends_with(".xls"));
    }

    #[test]
    fn nothing_to_export_is_a_no_op() {
        let (rows, cols) = (rows(), columns());
        for format in ExportFormat::ALL {
            assert!(job(&[], &cols, format).serialize(date()).unwrap().is_none());
            assert!(job(&rows, &[], format).serialize(date()).unwrap().is_none());
        }
    }

    #[test]
    fn hidden_columns_never_leak() {
        let rows = rows();
        let cols = columns();
        let visible = vec![cols[0].clone(), cols[2].clone()];
        for format in ExportFormat::ALL {
            let file = export(&rows, &visible, format);
            let text = String::from_utf8_lossy(&file.content).to_string();
            assert!(!text.contains("Fees paid"), "{format} shows a header");
            assert!(!text.contains("Yes"), "{format} shows a cell");
        }
    }

    #[test]
    fn formats_parse_from_cli_names() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        let xls: Result<ExportFormat, _> = "xls".parse();
        assert_eq!(xls, Ok(ExportFormat::SpreadsheetXml));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
