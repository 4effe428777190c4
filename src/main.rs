use std::path::PathBuf;

use nagris_tui::app::RunOptions;

const HELP: &str = "Nagris-TUI - Watch and discuss short videos from the terminal.

  --version, -V          Show version and exit
  --help,    -h          Show this help message
  --config <path>        Read configuration from <path>
  --offline              Browse bundled sample videos without a backend";

enum Cli {
    Run(RunOptions),
    Exit(i32),
}

fn main() {
    let opts = match parse_args(std::env::args().skip(1)) {
        Cli::Run(opts) => opts,
        Cli::Exit(code) => std::process::exit(code),
    };

    if let Err(err) = nagris_tui::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Cli {
    let mut opts = RunOptions::default();
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Nagris-TUI {}", nagris_tui::VERSION);
                return Cli::Exit(0);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Cli::Exit(0);
            }
            "--offline" => opts.offline = true,
            "--config" => match args.next() {
                Some(path) => opts.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config needs a path");
                    return Cli::Exit(2);
                }
            },
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    opts.config_file = Some(PathBuf::from(path));
                } else {
                    eprintln!("error: unknown argument {other}\n\n{HELP}");
                    return Cli::Exit(2);
                }
            }
        }
    }
    Cli::Run(opts)
}
