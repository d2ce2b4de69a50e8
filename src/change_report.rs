// Change-Report Filter - medicinal products out of the SNOMED CT-AU change report
//
// The predicate is strict on purpose: `semantic_tag` must be exactly
// "medicinal product", no trimming and no case folding.

use crate::config::Config;
use crate::discovery::{find_latest, FilePattern};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use regex::Regex;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const REPORT_PATTERN: &str = "SNOMEDCT-AU-concept-changes-*.csv";
pub const OUTPUT_PREFIX: &str = "SNOMEDCT-AU-MedicinalProducts";

pub const CONCEPT_ID_COLUMN: &str = "concept_ID";
pub const SEMANTIC_TAG_COLUMN: &str = "semantic_tag";
pub const URI_COLUMN: &str = "SNOMED_uri";

pub const TARGET_SEMANTIC_TAG: &str = "medicinal product";
pub const SNOMED_BASE_URI: &str = "http://snomed.info/id/";

/// Where the operator downloads the change report ("Download as CSV")
pub const NCTS_DOWNLOAD_PAGE: &str =
    "https://www.healthterminologies.gov.au/access-clinical-terminology/access-snomed-ct-au/other/";

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

// ============================================================================
// LAYOUT
// ============================================================================

/// Column positions resolved once from the header row
#[derive(Debug, Clone)]
pub struct ReportLayout {
    headers: StringRecord,
    concept_id: usize,
    semantic_tag: usize,
    summary: SummaryColumns,
}

/// Columns only used for the console listing; any of them may be absent
#[derive(Debug, Clone, Default)]
struct SummaryColumns {
    preferred_term: Option<usize>,
    status: Option<usize>,
    change_type: Option<usize>,
    inactive_reason: Option<usize>,
    target_concept_id: Option<usize>,
    target_preferred_term: Option<usize>,
}

impl ReportLayout {
    /// Fails with `MalformedInput` when `concept_ID` or `semantic_tag` is missing
    pub fn from_headers(headers: &StringRecord, path: &Path) -> Result<Self> {
        let position = |name: &str| headers.iter().position(|h| h == name);

        let concept_id = position(CONCEPT_ID_COLUMN).ok_or_else(|| {
            Error::malformed(path, format!("missing column `{}`", CONCEPT_ID_COLUMN))
        })?;
        let semantic_tag = position(SEMANTIC_TAG_COLUMN).ok_or_else(|| {
            Error::malformed(path, format!("missing column `{}`", SEMANTIC_TAG_COLUMN))
        })?;

        Ok(ReportLayout {
            headers: headers.clone(),
            concept_id,
            semantic_tag,
            summary: SummaryColumns {
                preferred_term: position("preferred_term"),
                status: position("status"),
                change_type: position("change_type"),
                inactive_reason: position("inactive_reason"),
                target_concept_id: position("target_concept_id"),
                target_preferred_term: position("target_concept_preferred_term"),
            },
        })
    }

    /// Input headers with `SNOMED_uri` right after `concept_ID`
    pub fn output_headers(&self) -> StringRecord {
        let mut out = StringRecord::new();
        for (i, header) in self.headers.iter().enumerate() {
            out.push_field(header);
            if i == self.concept_id {
                out.push_field(URI_COLUMN);
            }
        }
        out
    }

    pub fn is_medicinal_product(&self, record: &StringRecord) -> bool {
        record.get(self.semantic_tag) == Some(TARGET_SEMANTIC_TAG)
    }

    pub fn concept_uri(&self, record: &StringRecord) -> String {
        format!(
            "{}{}",
            SNOMED_BASE_URI,
            record.get(self.concept_id).unwrap_or("")
        )
    }

    /// Copy a row with the URI inserted. Short rows are padded with empty
    /// cells up to the header width; extra cells are kept at the end.
    pub fn annotate(&self, record: &StringRecord) -> StringRecord {
        let width = self.headers.len().max(record.len());
        let mut out = StringRecord::with_capacity(record.as_slice().len() + 64, width + 1);
        for i in 0..width {
            out.push_field(record.get(i).unwrap_or(""));
            if i == self.concept_id {
                out.push_field(&self.concept_uri(record));
            }
        }
        out
    }

    fn summarize(&self, record: &StringRecord) -> ProductSummary {
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        ProductSummary {
            concept_id: record.get(self.concept_id).unwrap_or("").to_string(),
            uri: self.concept_uri(record),
            preferred_term: cell(self.summary.preferred_term),
            status: cell(self.summary.status),
            change_type: cell(self.summary.change_type),
            inactive_reason: cell(self.summary.inactive_reason),
            target_concept_id: cell(self.summary.target_concept_id),
            target_preferred_term: cell(self.summary.target_preferred_term),
        }
    }
}

// ============================================================================
// DELIMITER
// ============================================================================

/// Pick the delimiter from a header line: the most frequent of `,` `\t` `;` `|`
/// outside double quotes. Ties and no hits fall back to `,`.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;

    for byte in header_line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|d| *d == byte) {
                counts[i] += 1;
            }
        }
    }

    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

fn sniff_file(path: &Path) -> Result<u8> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::NoInputFound {
            pattern: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        },
        _ => Error::io(path, e),
    })?;

    let mut first_line = Vec::new();
    BufReader::new(file)
        .read_until(b'\n', &mut first_line)
        .map_err(|e| Error::io(path, e))?;
    Ok(sniff_delimiter(&String::from_utf8_lossy(&first_line)))
}

// ============================================================================
// OUTPUT DATES
// ============================================================================

/// Start and end tokens of the output file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// False when both dates fell back to today
    pub from_file_name: bool,
}

fn span_pattern() -> Option<&'static Regex> {
    static SPAN: OnceLock<Option<Regex>> = OnceLock::new();
    SPAN.get_or_init(|| Regex::new(r"(?:^|\D)(\d{8})-(\d{8})(?:\D|$)").ok())
        .as_ref()
}

impl DateSpan {
    /// Dates from the first `YYYYMMDD-YYYYMMDD` pair in `file_name`, else
    /// `today` for both. A pair with an impossible date counts as absent.
    pub fn from_file_name(file_name: &str, today: NaiveDate) -> Self {
        let parsed = span_pattern().and_then(|re| re.captures(file_name)).and_then(|caps| {
            let start = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()?;
            let end = NaiveDate::parse_from_str(&caps[2], "%Y%m%d").ok()?;
            Some((start, end))
        });

        match parsed {
            Some((start, end)) => DateSpan {
                start,
                end,
                from_file_name: true,
            },
            None => DateSpan {
                start: today,
                end: today,
                from_file_name: false,
            },
        }
    }

    /// `SNOMEDCT-AU-MedicinalProducts-<start>-<end>.csv`
    pub fn output_file_name(&self) -> String {
        format!(
            "{}-{}-{}.csv",
            OUTPUT_PREFIX,
            self.start.format("%Y%m%d"),
            self.end.format("%Y%m%d")
        )
    }
}

// ============================================================================
// FILTER
// ============================================================================

/// One matched row, for the console listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSummary {
    pub concept_id: String,
    pub uri: String,
    pub preferred_term: Option<String>,
    pub status: Option<String>,
    pub change_type: Option<String>,
    pub inactive_reason: Option<String>,
    pub target_concept_id: Option<String>,
    pub target_preferred_term: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub delimiter: char,
    pub rows_scanned: usize,
    pub rows_matched: usize,
    pub span: DateSpan,
    pub products: Vec<ProductSummary>,
}

/// Locate the latest change report in the working dir and filter it
pub fn run_filter(config: &Config, today: NaiveDate) -> Result<FilterReport> {
    let recency = config.recency.selector();
    let report = find_latest(
        &config.working_dir,
        &FilePattern::new(REPORT_PATTERN),
        recency.as_ref(),
    )?;
    info!(input = %report.path.display(), recency = recency.name(), "using change report");
    filter_report(&report.path, config.report_output_dir(), today)
}

/// Filter `input` into `output_dir`.
///
/// The header is validated before any output exists. Rows are streamed into
/// a temporary file in `output_dir` which is renamed into place only after
/// the last row; on any error the temporary file is removed.
pub fn filter_report(input: &Path, output_dir: &Path, today: NaiveDate) -> Result<FilterReport> {
    let delimiter = sniff_file(input)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(input)
        .map_err(|e| Error::from_csv(input, e))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::from_csv(input, e))?
        .clone();
    let layout = ReportLayout::from_headers(&headers, input)?;
    debug!(columns = headers.len(), delimiter = %(delimiter as char).escape_default(), "header validated");

    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let span = DateSpan::from_file_name(file_name, today);
    if !span.from_file_name {
        info!(file = file_name, "no date span in file name, using today's date");
    }

    fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;
    let mut staged = tempfile::Builder::new()
        .prefix(".medicinal-products-")
        .suffix(".tmp")
        .tempfile_in(output_dir)
        .map_err(|e| Error::io(output_dir, e))?;
    let staged_path = staged.path().to_path_buf();

    let mut rows_scanned = 0;
    let mut products = Vec::new();
    {
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_writer(staged.as_file_mut());
        writer
            .write_record(&layout.output_headers())
            .map_err(|e| Error::from_csv(&staged_path, e))?;

        for result in reader.records() {
            let record = result.map_err(|e| Error::from_csv(input, e))?;
            rows_scanned += 1;

            if layout.is_medicinal_product(&record) {
                writer
                    .write_record(&layout.annotate(&record))
                    .map_err(|e| Error::from_csv(&staged_path, e))?;
                products.push(layout.summarize(&record));
            }
        }
        writer.flush().map_err(|e| Error::io(&staged_path, e))?;
    }

    let output = output_dir.join(span.output_file_name());
    staged
        .persist(&output)
        .map_err(|e| Error::io(&output, e.error))?;

    info!(
        rows_scanned,
        rows_matched = products.len(),
        output = %output.display(),
        "wrote medicinal products"
    );
    Ok(FilterReport {
        input: input.to_path_buf(),
        output,
        delimiter: delimiter as char,
        rows_scanned,
        rows_matched: products.len(),
        span,
        products,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "concept_ID,preferred_term,semantic_tag,status,change_type,inactive_reason,target_concept_id,target_concept_preferred_term";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    fn write_report(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn output_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_layout_requires_columns() {
        let path = Path::new("r.csv");
        assert!(ReportLayout::from_headers(&record(&["concept_ID", "semantic_tag"]), path).is_ok());

        let err = ReportLayout::from_headers(&record(&["id", "semantic_tag"]), path).unwrap_err();
        assert_eq!(err.kind(), "MalformedInput");
        assert!(err.to_string().contains("`concept_ID`"));

        let err = ReportLayout::from_headers(&record(&["concept_ID", "tag"]), path).unwrap_err();
        assert!(err.to_string().contains("`semantic_tag`"));
    }

    #[test]
    fn test_uri_inserted_after_concept_id() {
        let layout = ReportLayout::from_headers(
            &record(&["change", "concept_ID", "semantic_tag", "description"]),
            Path::new("r.csv"),
        )
        .unwrap();
        assert_eq!(
            layout.output_headers(),
            record(&["change", "concept_ID", "SNOMED_uri", "semantic_tag", "description"])
        );

        let row = record(&["new", "123456789", "medicinal product", "Foo Tablet"]);
        assert_eq!(
            layout.annotate(&row),
            record(&[
                "new",
                "123456789",
                "http://snomed.info/id/123456789",
                "medicinal product",
                "Foo Tablet"
            ])
        );
    }

    #[test]
    fn test_annotate_pads_short_rows_and_keeps_extras() {
        let layout = ReportLayout::from_headers(
            &record(&["concept_ID", "semantic_tag", "description"]),
            Path::new("r.csv"),
        )
        .unwrap();
        assert_eq!(
            layout.annotate(&record(&["9", "medicinal product"])),
            record(&["9", "http://snomed.info/id/9", "medicinal product", ""])
        );
        assert_eq!(
            layout.annotate(&record(&["9", "medicinal product", "d", "extra"])),
            record(&["9", "http://snomed.info/id/9", "medicinal product", "d", "extra"])
        );
    }

    #[test]
    fn test_predicate_is_strict() {
        let layout = ReportLayout::from_headers(
            &record(&["concept_ID", "semantic_tag"]),
            Path::new("r.csv"),
        )
        .unwrap();
        assert!(layout.is_medicinal_product(&record(&["1", "medicinal product"])));
        assert!(!layout.is_medicinal_product(&record(&["1", "Medicinal product"])));
        assert!(!layout.is_medicinal_product(&record(&["1", "medicinal product "])));
        assert!(!layout.is_medicinal_product(&record(&["1", "medicinal product form"])));
        assert!(!layout.is_medicinal_product(&record(&["1"])));
    }

    #[test]
    fn test_uri_accepts_any_identifier() {
        let layout = ReportLayout::from_headers(
            &record(&["concept_ID", "semantic_tag"]),
            Path::new("r.csv"),
        )
        .unwrap();
        assert_eq!(
            layout.concept_uri(&record(&["ABC-1", "medicinal product"])),
            "http://snomed.info/id/ABC-1"
        );
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("concept_ID,semantic_tag,status"), b',');
        assert_eq!(sniff_delimiter("concept_ID\tsemantic_tag\tstatus\n"), b'\t');
        assert_eq!(sniff_delimiter("concept_ID;\"a,b,c\";status"), b';');
        assert_eq!(sniff_delimiter("single"), b',');
        assert_eq!(sniff_delimiter("a,b|c"), b',');
    }

    #[test]
    fn test_span_from_file_name() {
        let span = DateSpan::from_file_name("SNOMEDCT-AU-concept-changes-20250101-20250131.csv", today());
        assert!(span.from_file_name);
        assert_eq!(span.start, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(span.end, NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
        assert_eq!(
            span.output_file_name(),
            "SNOMEDCT-AU-MedicinalProducts-20250101-20250131.csv"
        );
    }

    #[test]
    fn test_span_falls_back_to_today() {
        for name in [
            "SNOMEDCT-AU-concept-changes-latest.csv",
            "SNOMEDCT-AU-concept-changes-20251301-20251331.csv",
            "SNOMEDCT-AU-concept-changes-120250101-20250131.csv",
        ] {
            let span = DateSpan::from_file_name(name, today());
            assert!(!span.from_file_name, "{}", name);
            assert_eq!(
                span.output_file_name(),
                "SNOMEDCT-AU-MedicinalProducts-20250314-20250314.csv"
            );
        }
    }

    #[test]
    fn test_filter_report_example() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("outputs");
        let body = format!(
            "{}\n\
             123456789,Foo Tablet,medicinal product,ACTIVE,NEW,,,\n\
             22,Bar,clinical drug,ACTIVE,NEW,,,\n\
             33,Baz,Medicinal product,ACTIVE,NEW,,,\n\
             44,\"Qux, oral\",medicinal product,INACTIVE,RETIRED,DUPLICATE,55,Qux\n",
            HEADER
        );
        let input = write_report(dir.path(), "SNOMEDCT-AU-concept-changes-20250101-20250131.csv", &body);

        let report = filter_report(&input, &out, today()).unwrap();
        assert_eq!(report.rows_scanned, 4);
        assert_eq!(report.rows_matched, 2);
        assert_eq!(
            report.output,
            out.join("SNOMEDCT-AU-MedicinalProducts-20250101-20250131.csv")
        );

        let written = fs::read_to_string(&report.output).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            vec![
                "concept_ID,SNOMED_uri,preferred_term,semantic_tag,status,change_type,inactive_reason,target_concept_id,target_concept_preferred_term",
                "123456789,http://snomed.info/id/123456789,Foo Tablet,medicinal product,ACTIVE,NEW,,,",
                "44,http://snomed.info/id/44,\"Qux, oral\",medicinal product,INACTIVE,RETIRED,DUPLICATE,55,Qux",
            ]
        );

        let qux = &report.products[1];
        assert_eq!(qux.preferred_term.as_deref(), Some("Qux, oral"));
        assert_eq!(qux.inactive_reason.as_deref(), Some("DUPLICATE"));
        assert_eq!(qux.target_concept_id.as_deref(), Some("55"));
        assert_eq!(report.products[0].change_type.as_deref(), Some("NEW"));
        assert_eq!(report.products[0].target_concept_id, None);

        // no temporary file left next to the output
        assert_eq!(
            output_files(&out),
            vec!["SNOMEDCT-AU-MedicinalProducts-20250101-20250131.csv".to_string()]
        );
    }

    #[test]
    fn test_header_only_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_report(
            dir.path(),
            "SNOMEDCT-AU-concept-changes-20250201-20250228.csv",
            "concept_ID,semantic_tag,description\n",
        );

        let report = filter_report(&input, dir.path(), today()).unwrap();
        assert_eq!(report.rows_scanned, 0);
        assert_eq!(report.rows_matched, 0);
        assert_eq!(
            fs::read_to_string(&report.output).unwrap(),
            "concept_ID,SNOMED_uri,semantic_tag,description\n"
        );
    }

    #[test]
    fn test_missing_column_creates_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in").join("SNOMEDCT-AU-concept-changes-20250101-20250131.csv");
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, "id,semantic_tag\n1,medicinal product\n").unwrap();
        let out = dir.path().join("out");

        let err = filter_report(&input, &out, today()).unwrap_err();
        assert_eq!(err.kind(), "MalformedInput");
        assert!(!out.exists());
    }

    #[test]
    fn test_unwritable_output_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_report(
            dir.path(),
            "SNOMEDCT-AU-concept-changes-20250101-20250131.csv",
            "concept_ID,semantic_tag\n1,medicinal product\n",
        );
        // a regular file where the output directory should be
        let blocked = dir.path().join("outputs");
        fs::write(&blocked, "not a directory").unwrap();

        let err = filter_report(&input, &blocked, today()).unwrap_err();
        assert_eq!(err.kind(), "IOFailure");
        assert_eq!(fs::read_to_string(&blocked).unwrap(), "not a directory");
        assert!(!dir
            .path()
            .join("SNOMEDCT-AU-MedicinalProducts-20250101-20250131.csv")
            .exists());
    }

    #[test]
    fn test_bad_row_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("SNOMEDCT-AU-concept-changes-20250101-20250131.csv");
        let mut body = b"concept_ID,semantic_tag\n1,medicinal product\n2,".to_vec();
        body.extend_from_slice(&[0xff, 0xfe]);
        body.extend_from_slice(b"\n");
        fs::write(&input, body).unwrap();
        let out = dir.path().join("out");

        let err = filter_report(&input, &out, today()).unwrap_err();
        assert_eq!(err.kind(), "MalformedInput");
        assert!(output_files(&out).is_empty());
    }

    #[test]
    fn test_tab_delimited_round_trips_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_report(
            dir.path(),
            "SNOMEDCT-AU-concept-changes-20250101-20250131.csv",
            "semantic_tag\tconcept_ID\tnote\nmedicinal product\t77\thas, comma\n",
        );

        let report = filter_report(&input, &dir.path().join("out"), today()).unwrap();
        assert_eq!(report.delimiter, '\t');
        assert_eq!(
            fs::read_to_string(&report.output).unwrap(),
            "semantic_tag\tconcept_ID\tSNOMED_uri\tnote\nmedicinal product\t77\thttp://snomed.info/id/77\thas, comma\n"
        );
    }

    #[test]
    fn test_missing_input_is_no_input_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = filter_report(&dir.path().join("absent.csv"), dir.path(), today()).unwrap_err();
        assert_eq!(err.kind(), "NoInputFound");
    }

    #[test]
    fn test_run_filter_picks_latest_report() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::default().resolve(root.path());
        fs::create_dir_all(&config.working_dir).unwrap();
        write_report(
            &config.working_dir,
            "SNOMEDCT-AU-concept-changes-20241201-20241231.csv",
            "concept_ID,semantic_tag\n1,medicinal product\n",
        );
        write_report(
            &config.working_dir,
            "SNOMEDCT-AU-concept-changes-20250101-20250131.csv",
            "concept_ID,semantic_tag\n2,medicinal product\n3,medicinal product\n",
        );

        let report = run_filter(&config, today()).unwrap();
        assert_eq!(report.rows_matched, 2);
        assert_eq!(
            report.output,
            config
                .working_dir
                .join("SNOMEDCT-AU-MedicinalProducts-20250101-20250131.csv")
        );
    }

    #[test]
    fn test_run_filter_without_report() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::default().resolve(root.path());
        let err = run_filter(&config, today()).unwrap_err();
        assert_eq!(err.kind(), "NoInputFound");
    }
}
