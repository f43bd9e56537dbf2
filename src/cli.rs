use crate::{Error, Result};

/// Options for the `run` command; values are `None` when not provided on CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub device: Option<String>,
    pub devices: Option<u8>,
    pub database: Option<String>,
    pub serial_timeout_ms: Option<u64>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub config: Option<String>,
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunOptions),
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut iter = args.iter();
        match iter.next().map(|s| s.as_str()) {
            None => Ok(Command::Run(RunOptions::default())),
            Some("run") => Ok(Command::Run(parse_run_options(&mut iter)?)),
            Some("--help") | Some("-h") => Ok(Command::ShowHelp),
            Some("--version") | Some("-V") => Ok(Command::ShowVersion),
            Some(flag) if flag.starts_with('-') => {
                // `run` may be omitted: hand every arg to the run parser.
                let mut iter = args.iter();
                Ok(Command::Run(parse_run_options(&mut iter)?))
            }
            Some(cmd) => Err(Error::InvalidArgs(format!(
                "unknown command '{cmd}', try --help"
            ))),
        }
    }

    pub fn help() -> &'static str {
        concat!(
            "vesselwatch - Modbus RTU level poller\n",
            "\n",
            "USAGE:\n",
            "  vesselwatch run [--device <path>] [--devices <n>] [--database <path>]\n",
            "                  [--serial-timeout-ms <ms>] [--log-level <level>] [--log-file <path>]\n",
            "                  [--config <path>]\n",
            "  vesselwatch --help\n",
            "  vesselwatch --version\n",
            "\n",
            "OPTIONS:\n",
            "  --device <path>           Serial port of the bus (default: /dev/ttyUSB0)\n",
            "  --devices <n>             Number of devices, addressed 1..n (default: 5)\n",
            "  --database <path>         SQLite file for readings (default: vessel_readings.db)\n",
            "  --serial-timeout-ms <ms>  Response timeout per request (default: 1000)\n",
            "  --log-level <level>       error|warn|info|debug|trace (default: info)\n",
            "  --log-file <path>         Append logs to this file instead of stderr\n",
            "  --config <path>           Config file (default: ~/.vesselwatch/config.toml)\n",
            "  -h, --help                Show this help\n",
            "  -V, --version             Show version\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn parse_run_options(iter: &mut std::slice::Iter<String>) -> Result<RunOptions> {
    let mut opts = RunOptions::default();

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--device" => opts.device = Some(take_value(flag, iter)?),
            "--devices" => {
                let raw = take_value(flag, iter)?;
                opts.devices = Some(raw.parse().map_err(|_| {
                    Error::InvalidArgs("devices must be an integer between 1 and 247".to_string())
                })?);
            }
            "--database" => opts.database = Some(take_value(flag, iter)?),
            "--serial-timeout-ms" => {
                let raw = take_value(flag, iter)?;
                opts.serial_timeout_ms = Some(raw.parse().map_err(|_| {
                    Error::InvalidArgs("serial-timeout-ms must be a positive integer".to_string())
                })?);
            }
            "--log-level" => opts.log_level = Some(take_value(flag, iter)?),
            "--log-file" => opts.log_file = Some(take_value(flag, iter)?),
            "--config" => opts.config = Some(take_value(flag, iter)?),
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown flag '{other}', try --help"
                )));
            }
        }
    }

    Ok(opts)
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}
