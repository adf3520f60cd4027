//! The `mint` command-line tool.
//!
//! Subcommands: `init <source-dir>`, `options [<source-dir>]`, `config`,
//! `build [<target>...]`, `makefile`, `help`. Option assignments are passed
//! as `--name=value`; dashes and underscores are interchangeable in option
//! names.

use std::{env, process::ExitCode};

use mint::{BuildConfiguration, init_build_dir};

const USAGE: &str = "\
Usage: mint <command> [options]

Commands:
  init <source-dir>    Initialize a build directory for the given project.
  options              Show the project's user-settable options.
  config               Re-evaluate the configuration; --name=value sets options.
  build [target...]    Build the named targets, or all default targets.
  makefile             Print a Makefile equivalent of the build graph.
  help                 Show this message.

Flags:
  --jobs=N, -j N       Maximum concurrent build jobs (default 4).
  --trace-config       Echo shell commands during configuration.
  --verbose            Show debug-level messages.
";

struct CommandLine {
    command: String,
    positional: Vec<String>,
    assignments: Vec<(String, String)>,
    jobs: Option<usize>,
    trace_config: bool,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<CommandLine, String> {
    let mut command = None;
    let mut positional = Vec::new();
    let mut assignments = Vec::new();
    let mut jobs = None;
    let mut trace_config = false;
    let mut verbose = false;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if let Some(flag) = arg.strip_prefix("--") {
            match flag {
                "trace-config" => trace_config = true,
                "verbose" => verbose = true,
                "help" => command = Some("help".to_owned()),
                _ => {
                    if let Some(eq) = flag.find('=') {
                        let (name, value) = flag.split_at(eq);
                        if name == "jobs" {
                            jobs = Some(
                                value[1..]
                                    .parse()
                                    .map_err(|_| format!("Invalid job count: {}", &value[1..]))?,
                            );
                        } else {
                            assignments.push((name.to_owned(), value[1..].to_owned()));
                        }
                    } else {
                        return Err(format!("Unknown flag: --{flag}"));
                    }
                }
            }
        } else if arg == "-j" {
            i += 1;
            let value = args
                .get(i)
                .ok_or_else(|| "Missing value after -j".to_owned())?;
            jobs = Some(
                value
                    .parse()
                    .map_err(|_| format!("Invalid job count: {value}"))?,
            );
        } else if command.is_none() {
            command = Some(arg.clone());
        } else {
            positional.push(arg.clone());
        }
        i += 1;
    }

    Ok(CommandLine {
        command: command.unwrap_or_else(|| "help".to_owned()),
        positional,
        assignments,
        jobs,
        trace_config,
        verbose,
    })
}

fn build_root() -> String {
    env::current_dir()
        .map(|d| d.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".to_owned())
}

fn open_config(cmdline: &CommandLine) -> Option<BuildConfiguration> {
    let mut config = BuildConfiguration::new(build_root());
    config.diags.verbose = cmdline.verbose;
    config.trace_config = cmdline.trace_config;
    if let Some(jobs) = cmdline.jobs {
        config.max_jobs = jobs;
    }
    if !config.read_config() {
        eprintln!("error: no build configuration found; run 'mint init <source-dir>' first");
        return None;
    }
    Some(config)
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmdline = match parse_args(&args) {
        Ok(cmdline) => cmdline,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match cmdline.command.as_str() {
        "init" => {
            let Some(source_dir) = cmdline.positional.first() else {
                eprintln!("error: 'init' requires a source directory");
                return ExitCode::FAILURE;
            };
            let config = init_build_dir(&build_root(), source_dir);
            exit_code(&config)
        }
        "options" => {
            let mut config = match cmdline.positional.first() {
                Some(source_dir) => {
                    let mut config = BuildConfiguration::new(build_root());
                    config.diags.verbose = cmdline.verbose;
                    if !config.add_source_project(source_dir, true) {
                        return ExitCode::FAILURE;
                    }
                    config
                }
                None => match open_config(&cmdline) {
                    Some(config) => config,
                    None => return ExitCode::FAILURE,
                },
            };
            print!("{}", config.show_options());
            exit_code(&config)
        }
        "config" => {
            let Some(mut config) = open_config(&cmdline) else {
                return ExitCode::FAILURE;
            };
            config.set_options(&cmdline.assignments);
            config.configure();
            exit_code(&config)
        }
        "build" => {
            let Some(mut config) = open_config(&cmdline) else {
                return ExitCode::FAILURE;
            };
            config.set_options(&cmdline.assignments);
            let ok = config.build_targets(&cmdline.positional, None);
            if !ok {
                return ExitCode::FAILURE;
            }
            exit_code(&config)
        }
        "makefile" => {
            let Some(mut config) = open_config(&cmdline) else {
                return ExitCode::FAILURE;
            };
            print!("{}", config.generate_makefile());
            exit_code(&config)
        }
        "help" => {
            print!("{USAGE}");
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("error: unknown command '{other}'");
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
    }
}

fn exit_code(config: &BuildConfiguration) -> ExitCode {
    if config.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
