use std::convert::Infallible;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use switch_core::calibration::{CalibrationFactor, SleepClock};
use switch_core::config::{Configuration, FeatureMode, Selectors, VoltageClass, resolve_calibrated};
use switch_core::controller::{Controller, StatusFormatter, TickReport};
use switch_core::duty::LoadLevel;
use switch_core::monitor::{MonitorConfig, SupplySense};
use switch_core::scheduler::{WakeFlag, WakeScheduler, WakeTimer};
use switch_core::telemetry::EventId;

/// Where the interactive console keeps its transcript.
pub const TRANSCRIPT_PATH: &str = "transcripts/switch-emulator.log";

/// Reading comfortably above both undervoltage thresholds.
pub const DEFAULT_SUPPLY_RAW: u16 = 900;

const DEFAULT_EVENT_COUNT: usize = 10;
const DEFAULT_UNTIL_LIMIT: u32 = 20_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("tick", "tick [n]                  - run n wake ticks (default 1)"),
    (
        "until",
        "until <on|off> [max]      - tick until the load reaches a level",
    ),
    (
        "supply",
        "supply <raw>              - set the simulated divider reading",
    ),
    (
        "noise",
        "noise <n>                 - resume n times without a wake before the next tick",
    ),
    (
        "inject-state",
        "inject-state <n>          - overwrite the duty phase with a raw value",
    ),
    ("status", "status                    - display controller state"),
    ("events", "events [n]                - show the last n telemetry records"),
    ("help", "help [topic]              - show help for a command"),
    ("exit", "exit                      - close the session"),
];

/// Boot-time inputs chosen on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    pub selectors: Selectors,
    pub calibration: CalibrationFactor,
    pub supply_raw: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            selectors: Selectors {
                voltage: VoltageClass::Nominal12V,
                feature: FeatureMode::FullFeature,
            },
            calibration: CalibrationFactor::ABSENT,
            supply_raw: DEFAULT_SUPPLY_RAW,
        }
    }
}

impl SessionOptions {
    pub fn configuration(self) -> Configuration {
        resolve_calibrated(self.selectors, &SleepClock::LSI_32K, self.calibration)
    }
}

type EmulatedController = Controller<SimLoad, SimSense, NoDelay>;

pub struct Session {
    controller: EmulatedController,
    flag: WakeFlag,
    pending_noise: u32,
    spurious_total: u32,
    mirror_next: EventId,
    transcript: TranscriptLogger,
    started_at: HostInstant,
}

impl Session {
    pub fn new(options: SessionOptions) -> io::Result<Self> {
        let transcript = TranscriptLogger::open(Path::new(TRANSCRIPT_PATH), options)?;
        Ok(Self::with_transcript(options, transcript))
    }

    fn with_transcript(options: SessionOptions, transcript: TranscriptLogger) -> Self {
        let controller = Controller::boot(
            options.configuration(),
            MonitorConfig::default(),
            SimLoad::default(),
            SimSense::new(options.supply_raw),
            NoDelay,
        );

        Self {
            controller,
            flag: WakeFlag::new(),
            pending_noise: 0,
            spurious_total: 0,
            mirror_next: 0,
            transcript,
            started_at: HostInstant::now(),
        }
    }

    /// Lines printed once before the first prompt: configuration and boot events.
    pub fn banner(&mut self) -> io::Result<Vec<String>> {
        let mut lines = vec![format!("config {}", self.controller.config())];
        lines.extend(self.drain_events());
        self.record_output(self.started_at.elapsed(), &lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let lines = match verb.as_str() {
            "help" => help_lines(args.first().copied()),
            "tick" => self.handle_tick(&args),
            "until" => self.handle_until(&args),
            "supply" => self.handle_supply(&args),
            "noise" => self.handle_noise(&args),
            "inject-state" => self.handle_inject(&args),
            "status" => self.status_lines(),
            "events" => self.handle_events(&args),
            other => vec![format!("ERR unknown command `{other}` (try `help`)")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn handle_tick(&mut self, args: &[&str]) -> Vec<String> {
        let count = match optional_number::<u32>(args.first(), 1, "tick count") {
            Ok(count) => count,
            Err(message) => return vec![message],
        };

        let mut last = None;
        for _ in 0..count {
            last = Some(self.run_tick());
        }

        let mut lines = self.drain_events();
        lines.push(match last {
            Some(report) => format!("OK tick={} load={}", report.tick.ticks(), report.load),
            None => format!(
                "OK tick={} load={}",
                self.controller.now().ticks(),
                self.controller.load_level()
            ),
        });
        lines
    }

    fn handle_until(&mut self, args: &[&str]) -> Vec<String> {
        let target = match args.first().map(|word| word.to_ascii_lowercase()) {
            Some(word) if word == "on" => LoadLevel::Energized,
            Some(word) if word == "off" => LoadLevel::DeEnergized,
            Some(word) => return vec![format!("ERR syntax expected `on` or `off`, got `{word}`")],
            None => return vec!["ERR syntax until <on|off> [max]".to_string()],
        };
        let limit = match optional_number::<u32>(args.get(1), DEFAULT_UNTIL_LIMIT, "tick limit") {
            Ok(limit) => limit,
            Err(message) => return vec![message],
        };

        let start = self.controller.now();
        let mut reached = self.controller.load_level() == target;
        let mut ticks = 0;
        while !reached && ticks < limit {
            reached = self.run_tick().load == target;
            ticks += 1;
        }

        let mut lines = self.drain_events();
        let now = self.controller.now();
        if reached {
            lines.push(format!(
                "OK tick={} load={} after={}",
                now.ticks(),
                target,
                now.ticks_since(start)
            ));
        } else {
            lines.push(format!(
                "ERR until load still {} after {limit} ticks",
                self.controller.load_level()
            ));
        }
        lines
    }

    fn handle_supply(&mut self, args: &[&str]) -> Vec<String> {
        match required_number::<u16>(args.first(), "supply <raw>") {
            Ok(raw) => {
                self.controller.sense_mut().raw = raw;
                vec![format!("OK supply raw={raw}")]
            }
            Err(message) => vec![message],
        }
    }

    fn handle_noise(&mut self, args: &[&str]) -> Vec<String> {
        match required_number::<u32>(args.first(), "noise <n>") {
            Ok(count) => {
                self.pending_noise = count;
                vec![format!("OK noise pending={count}")]
            }
            Err(message) => vec![message],
        }
    }

    fn handle_inject(&mut self, args: &[&str]) -> Vec<String> {
        match required_number::<u8>(args.first(), "inject-state <n>") {
            Ok(raw) => {
                let state = self.controller.inject_duty_state(raw);
                let mut lines = self.drain_events();
                lines.push(format!("OK duty state={state}"));
                lines
            }
            Err(message) => vec![message],
        }
    }

    fn handle_events(&mut self, args: &[&str]) -> Vec<String> {
        let count = match optional_number::<usize>(args.first(), DEFAULT_EVENT_COUNT, "event count")
        {
            Ok(count) => count,
            Err(message) => return vec![message],
        };

        let telemetry = self.controller.telemetry();
        let skip = telemetry.len().saturating_sub(count);
        let lines: Vec<String> = telemetry
            .oldest_first()
            .skip(skip)
            .map(|record| format!("event {record}"))
            .collect();
        if lines.is_empty() {
            vec!["no events recorded".to_string()]
        } else {
            lines
        }
    }

    fn status_lines(&self) -> Vec<String> {
        self.render_status()
            .unwrap_or_else(|_| vec!["ERR status rendering failed".to_string()])
    }

    fn render_status(&self) -> Result<Vec<String>, fmt::Error> {
        let snapshot = self.controller.snapshot();
        let formatter = StatusFormatter::new(&snapshot);

        Ok(vec![
            render_line(|out| formatter.write_config_line(out))?,
            render_line(|out| formatter.write_duty_line(out))?,
            render_line(|out| formatter.write_supply_line(out))?,
            format!(
                "wake spurious={} uptime~{}s",
                self.spurious_total,
                snapshot.now.nominal_millis() / 1_000
            ),
        ])
    }

    /// Sleeps the simulated timer through one wake and dispatches the tick.
    fn run_tick(&mut self) -> TickReport {
        let timer = HostWakeTimer::new(&self.flag, mem::take(&mut self.pending_noise));
        let mut scheduler = WakeScheduler::new(timer, &self.flag);
        let event = scheduler.wait_for_wake();
        self.spurious_total = self.spurious_total.saturating_add(event.spurious_resumes);
        self.controller.on_wake(event)
    }

    /// Formats every telemetry record added since the previous drain.
    fn drain_events(&mut self) -> Vec<String> {
        let telemetry = self.controller.telemetry();
        let cursor = self.mirror_next;
        let lines = telemetry
            .oldest_first()
            .filter(|record| record.id.wrapping_sub(cursor) < EventId::MAX / 2)
            .map(|record| format!("event {record}"))
            .collect();
        self.mirror_next = telemetry.next_id();
        lines
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn render_line<F>(write: F) -> Result<String, fmt::Error>
where
    F: FnOnce(&mut String) -> fmt::Result,
{
    let mut line = String::new();
    write(&mut line)?;
    Ok(line)
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn required_number<T: std::str::FromStr>(word: Option<&&str>, usage: &str) -> Result<T, String> {
    match word {
        Some(word) => word
            .parse()
            .map_err(|_| format!("ERR syntax `{word}` is not a valid number")),
        None => Err(format!("ERR syntax {usage}")),
    }
}

fn optional_number<T: std::str::FromStr>(
    word: Option<&&str>,
    default: T,
    what: &str,
) -> Result<T, String> {
    match word {
        Some(word) => word
            .parse()
            .map_err(|_| format!("ERR syntax invalid {what} `{word}`")),
        None => Ok(default),
    }
}

/// Load switch output that only remembers its level.
#[derive(Debug, Default)]
struct SimLoad {
    high: bool,
}

impl ErrorType for SimLoad {
    type Error = Infallible;
}

impl OutputPin for SimLoad {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

/// Divider front end returning whatever `supply` last set.
#[derive(Debug)]
struct SimSense {
    raw: u16,
    powered: bool,
}

impl SimSense {
    fn new(raw: u16) -> Self {
        Self {
            raw,
            powered: false,
        }
    }
}

impl SupplySense for SimSense {
    type Error = Infallible;

    fn power_up(&mut self) {
        self.powered = true;
    }

    fn read_raw(&mut self) -> Result<u16, Self::Error> {
        Ok(if self.powered { self.raw } else { 0 })
    }

    fn power_down(&mut self) {
        self.powered = false;
    }
}

/// Settle delays are meaningless against a simulated divider.
struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Wake timer that fires on the first suspend after `noise` spurious resumes.
struct HostWakeTimer<'a> {
    flag: &'a WakeFlag,
    noise: u32,
    armed: bool,
}

impl<'a> HostWakeTimer<'a> {
    fn new(flag: &'a WakeFlag, noise: u32) -> Self {
        Self {
            flag,
            noise,
            armed: false,
        }
    }
}

impl WakeTimer for HostWakeTimer<'_> {
    type Error = Infallible;

    fn arm(&mut self) {
        self.armed = true;
    }

    fn suspend(&mut self) {
        if self.noise > 0 {
            self.noise -= 1;
        } else if self.armed {
            self.armed = false;
            self.flag.signal();
        }
    }

    fn disarm(&mut self) -> Result<(), Self::Error> {
        self.armed = false;
        Ok(())
    }
}

struct TranscriptLogger {
    writer: BufWriter<Box<dyn Write>>,
}

impl TranscriptLogger {
    fn open(path: &Path, options: SessionOptions) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut logger = Self {
            writer: BufWriter::new(Box::new(file)),
        };
        logger.write_header(options)?;
        Ok(logger)
    }

    #[cfg(test)]
    fn discard() -> Self {
        Self {
            writer: BufWriter::new(Box::new(io::sink())),
        }
    }

    fn write_header(&mut self, options: SessionOptions) -> io::Result<()> {
        writeln!(self.writer, "# Load switch emulator transcript")?;
        writeln!(
            self.writer,
            "# {} calibration={} supply={}",
            options.configuration(),
            options.calibration,
            options.supply_raw
        )?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
