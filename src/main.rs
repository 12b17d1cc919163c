use tyrec::*;

use std::path::PathBuf;

use clap::Parser;

use inference_config::{CommandLineInferenceConfig, InferenceConfig, TypeSrc};
use solver::{InferenceError, TypeInference};
use type_graph::{Coverage, DumpTypes};

/// Recover source-level types for values of an opaque-pointer IR module
#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    /// Path to a textual IR module (`.ll` subset)
    module: PathBuf,
    /// Which evidence source seeds the type graph
    #[clap(long, arg_enum, default_value = "comb")]
    type_src: TypeSrc,
    /// Print every recovered value type to stdout, one value per line
    #[clap(long)]
    dump_types: bool,
    /// Print the coverage summary (total, covered, percentage)
    #[clap(long)]
    coverage: bool,
    /// Path to send log (as JSON) to
    ///
    /// Error or higher severity alerts will still continue being shown at
    /// stderr (in addition to being added to the log)
    #[clap(long = "--log")]
    log_file: Option<PathBuf>,
    /// Disable terminal logging, even for high severity alerts
    #[clap(long)]
    debug_disable_terminal_logging: bool,
    /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
    #[clap(short, long, parse(from_occurrences))]
    debug: usize,
    /// Advanced configuration options to tweak the inference behavior
    #[clap(short = 'Z', long, arg_enum)]
    advanced_config: Vec<CommandLineInferenceConfig>,
}

fn main() {
    let args = Args::parse();

    let _log_guard = slog_scope::set_global_logger(log::TermAndFileDrain::new(
        args.debug,
        args.debug_disable_terminal_logging,
        args.log_file,
    ));

    let text =
        std::fs::read_to_string(&args.module).expect("module file could not be read");
    let module = ll_parser::lift_from(&text);

    let mut config = InferenceConfig::from(args.advanced_config);
    config.type_src = args.type_src;

    let graph = match TypeInference::new(&module, config).run() {
        Ok(graph) => graph,
        Err(err @ InferenceError::MissingDebugInfo) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    if args.dump_types {
        print!(
            "{}",
            DumpTypes {
                module: &module,
                graph: &graph,
            }
        );
    }
    if args.coverage {
        print!("{}", Coverage::measure(&module, &graph));
    }

    log::trace!("Done");
}
