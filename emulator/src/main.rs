mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{Session, SessionOptions};
use switch_core::calibration::CalibrationFactor;
use switch_core::config::{FeatureMode, VoltageClass};

const USAGE: &str = "Usage: switch-emulator [--voltage <12v|24v>] [--features <full|protection>] \
                     [--calibration <hz>] [--supply <raw>]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Load Switch Emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for banner in session.banner()? {
        writeln!(writer, "{banner}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options<I>(args: I) -> Result<SessionOptions, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = SessionOptions::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let value = match inline.or_else(|| args.next()) {
            Some(value) => value,
            None => return Err(format!("Expected value after {flag}")),
        };

        match flag.as_str() {
            "--voltage" => options.selectors.voltage = parse_voltage(&value)?,
            "--features" => options.selectors.feature = parse_features(&value)?,
            "--calibration" => {
                let hz = value
                    .parse()
                    .map_err(|_| format!("Invalid calibration frequency `{value}`"))?;
                options.calibration = CalibrationFactor::from_hz(hz);
            }
            "--supply" => {
                options.supply_raw = value
                    .parse()
                    .map_err(|_| format!("Invalid supply reading `{value}`"))?;
            }
            other => return Err(format!("Unknown option `{other}`")),
        }
    }

    Ok(options)
}

fn parse_voltage(tag: &str) -> Result<VoltageClass, String> {
    if tag.eq_ignore_ascii_case("12v") {
        Ok(VoltageClass::Nominal12V)
    } else if tag.eq_ignore_ascii_case("24v") {
        Ok(VoltageClass::Nominal24V)
    } else {
        Err(format!("Unknown voltage class `{tag}`"))
    }
}

fn parse_features(tag: &str) -> Result<FeatureMode, String> {
    if tag.eq_ignore_ascii_case("full") {
        Ok(FeatureMode::FullFeature)
    } else if tag.eq_ignore_ascii_case("protection") {
        Ok(FeatureMode::ProtectionOnly)
    } else {
        Err(format!("Unknown feature mode `{tag}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn defaults_to_twelve_volt_full_feature() {
        assert_eq!(parse_options(args(&[])), Ok(SessionOptions::default()));
    }

    #[test]
    fn accepts_separate_and_inline_values() {
        let options = parse_options(args(&[
            "--voltage",
            "24V",
            "--features=protection",
            "--calibration",
            "120000",
            "--supply=650",
        ]))
        .unwrap();

        assert_eq!(options.selectors.voltage, VoltageClass::Nominal24V);
        assert_eq!(options.selectors.feature, FeatureMode::ProtectionOnly);
        assert_eq!(options.calibration.hz(), 120_000);
        assert_eq!(options.supply_raw, 650);
    }

    #[test]
    fn rejects_unknown_flags_and_missing_values() {
        assert!(parse_options(args(&["--mode", "x"])).is_err());
        assert!(parse_options(args(&["--supply"])).is_err());
        assert!(parse_options(args(&["--voltage", "48v"])).is_err());
    }
}
