//! This module is in charge of writing the analysis results to disk, as
//! whitespace-separated text tables and as JSON documents

use crate::{numeric::Float, Result};
use eyre::WrapErr;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use time::{macros::format_description, OffsetDateTime};

/// Number of significant digits in table output, as with printf's `%g`
pub const SIG_DIGITS: usize = 6;

/// Columns of the peak fit table
pub const FIT_COLUMNS: [&str; 16] = [
    "angle",
    "model",
    "mu_x",
    "mu_x_err",
    "mu_y",
    "mu_y_err",
    "E_sum",
    "E_sum_err",
    "deviation",
    "chi2",
    "reduced_chi2",
    "status",
    "integral",
    "integral_err",
    "rate",
    "rate_err",
];

/// Timestamp of the current time, e.g. `16-Oct-26   14:03:12`
pub fn timestamp() -> Result<String> {
    let format = format_description!(
        "[day]-[month repr:short]-[year repr:last_two]   [hour]:[minute]:[second]"
    );
    OffsetDateTime::now_utc()
        .format(format)
        .wrap_err("Failed to format the timestamp")
}

/// Create a buffered output file, with the path in error messages
pub fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).wrap_err_with(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Trait implemented by things which can go in a table cell
pub trait Cell {
    /// Write down `self` without surrounding whitespace
    fn write_cell(&self, out: &mut dyn Write) -> std::io::Result<()>;
}

impl Cell for &str {
    // Strings work in the usual way
    fn write_cell(&self, out: &mut dyn Write) -> std::io::Result<()> {
        write!(out, "{self}")
    }
}

impl Cell for u32 {
    // Integers too
    fn write_cell(&self, out: &mut dyn Write) -> std::io::Result<()> {
        write!(out, "{self}")
    }
}

impl Cell for usize {
    fn write_cell(&self, out: &mut dyn Write) -> std::io::Result<()> {
        write!(out, "{self}")
    }
}

impl Cell for Float {
    // Floats get a %g-like treatment
    fn write_cell(&self, out: &mut dyn Write) -> std::io::Result<()> {
        write_engineering(out, *self, SIG_DIGITS)
    }
}

/// Text table with a timestamp and a column header
///
/// ```text
/// # 16-Oct-26   14:03:12
/// # angle rate rate_err
/// 0 3.15 0.02
/// ```
///
pub struct TableWriter<W: Write> {
    /// Destination of the table
    out: W,

    /// Number of columns, checked on every row
    columns: usize,
}
//
impl TableWriter<BufWriter<File>> {
    /// Start a table in a new file
    pub fn create(path: &Path, columns: &[&str]) -> Result<Self> {
        let out = create_file(path)?;
        Self::new(out, columns).wrap_err_with(|| format!("Failed to write {}", path.display()))
    }
}
//
impl<W: Write> TableWriter<W> {
    /// Start a table by writing its header
    pub fn new(mut out: W, columns: &[&str]) -> Result<Self> {
        writeln!(out, "# {}", timestamp()?)?;
        writeln!(out, "# {}", columns.join(" "))?;
        Ok(Self {
            out,
            columns: columns.len(),
        })
    }

    /// Write one row
    pub fn row(&mut self, cells: &[&dyn Cell]) -> Result<()> {
        eyre::ensure!(
            cells.len() == self.columns,
            "Table row has {} cells for {} columns",
            cells.len(),
            self.columns
        );
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                write!(self.out, " ")?;
            }
            cell.write_cell(&mut self.out)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    /// Flush the table and give back the destination
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Write a floating-point number using "engineering" notation
///
/// Analogous to the %g format of the C printf function, this method switches
/// between naive and scientific notation for floating-point numbers when the
/// number being printed becomes so small that printing leading zeroes could end
/// up larger than the scientific notation, or so large that we would be forced
/// to print more significant digits than requested.
///
pub fn write_engineering(
    writer: &mut (impl Write + ?Sized),
    x: Float,
    sig_digits: usize,
) -> std::io::Result<()> {
    let mut precision = sig_digits.max(1) - 1;
    if x == 0. {
        // Zero is special because you can't take its log
        write!(writer, "0")
    } else if !x.is_finite() {
        write!(writer, "{x}")
    } else {
        // Otherwise, use log to evaluate order of magnitude
        let log_x = x.abs().log10();
        if log_x >= -3. && log_x < (sig_digits as Float) {
            // Rust's precision counts digits after the decimal point, so it
            // must shrink as the magnitude grows
            precision = (precision as isize - log_x.floor() as isize).max(0) as usize;

            // People don't normally expect trailing zeros or decimal point in
            // naive notation, but be careful with integer numbers...
            let str_with_zeros = format!("{:.1$}", x, precision);
            if str_with_zeros.contains('.') {
                write!(
                    writer,
                    "{}",
                    str_with_zeros.trim_end_matches('0').trim_end_matches('.')
                )
            } else {
                write!(writer, "{}", str_with_zeros)
            }
        } else {
            // Print using scientific notation
            write!(writer, "{:.1$e}", x, precision)
        }
    }
}

/// Write a value as pretty-printed JSON
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut out = create_file(path)?;
    serde_json::to_writer_pretty(&mut out, value)
        .wrap_err_with(|| format!("Failed to serialize {}", path.display()))?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Read back a JSON document
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).wrap_err_with(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .wrap_err_with(|| format!("Failed to parse {}", path.display()))
}

/// JSON has no NaN, serde_json writes it as `null`, so read `null` back as NaN
fn nullable<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Float, D::Error> {
    Ok(Option::<Float>::deserialize(deserializer)?.unwrap_or(Float::NAN))
}

/// One line of the peak fit table
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FitRow {
    /// Detector angle (degrees)
    pub angle: u32,

    /// Fitted model
    pub model: String,

    /// Centroid energy in detector 1 (keV)
    #[serde(deserialize_with = "nullable")]
    pub mu_x: Float,

    /// Uncertainty of `mu_x`
    #[serde(deserialize_with = "nullable")]
    pub mu_x_err: Float,

    /// Centroid energy in detector 2 (keV)
    #[serde(deserialize_with = "nullable")]
    pub mu_y: Float,

    /// Uncertainty of `mu_y`
    #[serde(deserialize_with = "nullable")]
    pub mu_y_err: Float,

    /// E₁ + E₂ (keV)
    #[serde(deserialize_with = "nullable")]
    pub e_sum: Float,

    /// Uncertainty of the sum
    #[serde(deserialize_with = "nullable")]
    pub e_sum_err: Float,

    /// E_sum − 511 keV
    #[serde(deserialize_with = "nullable")]
    pub deviation: Float,

    /// χ² at the minimum
    #[serde(deserialize_with = "nullable")]
    pub chi2: Float,

    /// χ² per degree of freedom
    #[serde(deserialize_with = "nullable")]
    pub reduced_chi2: Float,

    /// `CONVERGED` or `FAILED`
    pub status: String,

    /// Peak integral
    #[serde(deserialize_with = "nullable")]
    pub integral: Float,

    /// Uncertainty of the integral
    #[serde(deserialize_with = "nullable")]
    pub integral_err: Float,

    /// Integral per second of run time
    #[serde(deserialize_with = "nullable")]
    pub rate: Float,

    /// Uncertainty of the rate
    #[serde(deserialize_with = "nullable")]
    pub rate_err: Float,
}
//
impl FitRow {
    /// Truth that the fit converged
    pub fn is_converged(&self) -> bool {
        self.status == "CONVERGED"
    }

    /// Write the row into a fit table
    pub fn write_to<W: Write>(&self, table: &mut TableWriter<W>) -> Result<()> {
        table.row(&[
            &self.angle,
            &self.model.as_str(),
            &self.mu_x,
            &self.mu_x_err,
            &self.mu_y,
            &self.mu_y_err,
            &self.e_sum,
            &self.e_sum_err,
            &self.deviation,
            &self.chi2,
            &self.reduced_chi2,
            &self.status.as_str(),
            &self.integral,
            &self.integral_err,
            &self.rate,
            &self.rate_err,
        ])
    }
}

/// Write the fit table and its JSON twin, `<stem>.dat` and `<stem>.json`
pub fn write_fit_rows(output_dir: &Path, stem: &str, rows: &[FitRow]) -> Result<()> {
    let path = output_dir.join(format!("{stem}.dat"));
    let mut table = TableWriter::create(&path, &FIT_COLUMNS)?;
    for row in rows {
        row.write_to(&mut table)?;
    }
    table.finish()?;
    write_json(&output_dir.join(format!("{stem}.json")), &rows)
}
