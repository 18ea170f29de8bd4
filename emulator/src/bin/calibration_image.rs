//! Turns a table of measured sleep-oscillator frequencies into per-chip
//! calibration images ready to be programmed into the last flash page.
//!
//! Usage: `calibration-image [--nominal-hz <hz>] [table.md] [output-dir]`
//!
//! The nominal frequency defaults to the LSI oscillator the firmware's wake
//! timer runs from; measurements more than 25 % away from it are rejected.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use switch_core::calibration::{CalibrationFactor, CalibrationRecord, LSI_SLEEP_CLOCK_HZ, SleepClock};

const DEFAULT_TABLE: &str = "clock_calibrations.md";
const TABLE_HEADER_MARKER: &str = "Chip ID";
/// Rows with exactly this many separators carry data.
const DATA_ROW_SEPARATORS: usize = 4;
/// Accepted deviation from the nominal frequency, in percent.
const MAX_DEVIATION_PERCENT: u32 = 25;
const USAGE: &str = "Usage: calibration-image [--nominal-hz <hz>] [table.md] [output-dir]";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct ChipCalibration {
    id: u32,
    frequency_hz: u32,
}

impl ChipCalibration {
    fn file_name(self) -> String {
        format!("clock_calibration_{:03}.bin", self.id)
    }

    fn factor(self) -> CalibrationFactor {
        CalibrationFactor::from_hz(self.frequency_hz)
    }
}

#[derive(Debug, Eq, PartialEq)]
struct ToolArgs {
    nominal_hz: u32,
    table: PathBuf,
    out_dir: PathBuf,
}

impl ToolArgs {
    fn clock(&self) -> SleepClock {
        SleepClock::with_percent_band(self.nominal_hz, MAX_DEVIATION_PERCENT)
    }
}

#[derive(Debug, Eq, PartialEq)]
enum TableError {
    Malformed { line: usize, detail: String },
    OutOfRange(ChipCalibration),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Malformed { line, detail } => write!(f, "line {line}: {detail}"),
            TableError::OutOfRange(chip) => write!(
                f,
                "Frequency {}Hz of chip with id {:08x} is outside the accepted range, stopping here...",
                chip.frequency_hz, chip.id
            ),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum WriteOutcome {
    Written,
    Skipped,
}

fn main() -> io::Result<()> {
    let args = parse_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let contents = fs::read_to_string(&args.table)?;
    let chips = parse_table(&contents, args.clock()).unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(1);
    });

    for chip in chips {
        let path = args.out_dir.join(chip.file_name());
        match write_image(&path, chip)? {
            WriteOutcome::Written => println!("Writing file '{}'.", path.display()),
            WriteOutcome::Skipped => println!("{} already exists, skipping...", path.display()),
        }
    }

    Ok(())
}

fn parse_args<I>(args: I) -> Result<ToolArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut nominal_hz = LSI_SLEEP_CLOCK_HZ;
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let value = if let Some(value) = arg.strip_prefix("--nominal-hz=") {
            value.to_string()
        } else if arg == "--nominal-hz" {
            args.next()
                .ok_or_else(|| "Expected value after --nominal-hz".to_string())?
        } else if arg.starts_with("--") {
            return Err(format!("Unknown option `{arg}`"));
        } else {
            positional.push(arg);
            continue;
        };
        nominal_hz = match value.parse() {
            Ok(hz) if hz > 0 => hz,
            _ => return Err(format!("Invalid nominal frequency `{value}`")),
        };
    }

    if positional.len() > 2 {
        return Err("Too many arguments".to_string());
    }
    let mut positional = positional.into_iter();
    Ok(ToolArgs {
        nominal_hz,
        table: PathBuf::from(positional.next().unwrap_or_else(|| DEFAULT_TABLE.to_string())),
        out_dir: PathBuf::from(positional.next().unwrap_or_else(|| ".".to_string())),
    })
}

/// Collects every data row below the header line. The row right after the
/// header is the Markdown separator and is skipped.
fn parse_table(contents: &str, clock: SleepClock) -> Result<Vec<ChipCalibration>, TableError> {
    let mut rows_since_header: Option<usize> = None;
    let mut chips = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let Some(seen) = rows_since_header else {
            if line.contains(TABLE_HEADER_MARKER) {
                rows_since_header = Some(0);
            }
            continue;
        };
        let seen = seen + 1;
        rows_since_header = Some(seen);
        if seen == 1 || line.matches('|').count() != DATA_ROW_SEPARATORS {
            continue;
        }

        let chip = parse_row(index + 1, line)?;
        if !clock.accepts(chip.factor()) {
            return Err(TableError::OutOfRange(chip));
        }
        chips.push(chip);
    }

    Ok(chips)
}

fn parse_row(line_number: usize, line: &str) -> Result<ChipCalibration, TableError> {
    let mut columns = line.split('|').skip(1);
    let mut field = |name: &str| -> Result<u32, TableError> {
        let raw: String = columns
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        raw.parse().map_err(|_| TableError::Malformed {
            line: line_number,
            detail: format!("invalid {name} `{raw}`"),
        })
    };

    let id = field("chip id")?;
    let frequency_hz = field("frequency")?;
    Ok(ChipCalibration { id, frequency_hz })
}

/// Writes the 5-byte image unless a file with that name already exists.
fn write_image(path: &Path, chip: ChipCalibration) -> io::Result<WriteOutcome> {
    let file = OpenOptions::new().write(true).create_new(true).open(path);
    let mut file = match file {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Ok(WriteOutcome::Skipped);
        }
        Err(err) => return Err(err),
    };

    file.write_all(CalibrationRecord::encode(chip.frequency_hz).as_bytes())?;
    Ok(WriteOutcome::Written)
}
