pub mod constraints;
pub mod containers;
pub mod inference_config;
pub mod ir;
pub mod ll_parser;
pub mod metadata;
pub mod seeders;
pub mod solver;
pub mod tests;
pub mod type_graph;
pub mod type_names;
pub mod type_set;
pub mod worklist;

pub mod log {
    pub use slog_scope::{crit, debug, error, info, trace, warn};

    /// A drain that sends records to the terminal and, optionally, to a JSON
    /// log file. When a file is given, the terminal only shows errors.
    pub struct TermAndFileDrain {
        file_drain: Option<slog::Logger>,
        term_drain: slog::Logger,
    }

    impl TermAndFileDrain {
        /// Build the root logger. `debug_level` counts `-d` occurrences
        /// (0-warn, 1-info, 2-debug, 3-trace).
        pub fn new(
            debug_level: usize,
            disable_terminal_logging: bool,
            path: Option<std::path::PathBuf>,
        ) -> slog::Logger {
            use sloggers::Build;

            let debug_level = match debug_level {
                0 => sloggers::types::Severity::Warning,
                1 => sloggers::types::Severity::Info,
                2 => sloggers::types::Severity::Debug,
                _ => sloggers::types::Severity::Trace,
            };

            let term_drain = if disable_terminal_logging {
                sloggers::null::NullLoggerBuilder.build().unwrap()
            } else {
                sloggers::terminal::TerminalLoggerBuilder::new()
                    .destination(sloggers::terminal::Destination::Stderr)
                    .level(if path.is_none() {
                        debug_level
                    } else {
                        sloggers::types::Severity::Error
                    })
                    .overflow_strategy(sloggers::types::OverflowStrategy::Block)
                    .format(sloggers::types::Format::Compact)
                    .build()
                    .unwrap()
            };

            let file_drain = path.map(|path| {
                sloggers::file::FileLoggerBuilder::new(path)
                    .truncate()
                    .level(debug_level)
                    .overflow_strategy(sloggers::types::OverflowStrategy::Block)
                    .format(sloggers::types::Format::Json)
                    .build()
                    .unwrap()
            });

            slog::Logger::root(
                Self {
                    file_drain,
                    term_drain,
                },
                slog::o!(),
            )
        }
    }

    impl slog::Drain for TermAndFileDrain {
        type Ok = ();
        type Err = slog::Never;
        fn log(
            &self,
            r: &slog::Record<'_>,
            kv: &slog::OwnedKVList,
        ) -> Result<<Self as slog::Drain>::Ok, <Self as slog::Drain>::Err> {
            if let Some(f) = &self.file_drain {
                <slog::Logger as slog::Drain>::log(f, r, kv)?;
            }
            <slog::Logger as slog::Drain>::log(&self.term_drain, r, kv)?;
            Ok(())
        }
    }
}
