use std::{
    collections::HashMap,
    fmt::Write as _,
    fs::OpenOptions,
    path::PathBuf,
};
use nu_ansi_term::{Color, Style};
use serde::Deserialize;
use termcolor::ColorChoice;
use tracing::{field::Visit, Level};
use tracing_log::NormalizeEvent;
use tracing_subscriber::{
    filter::{FilterFn, LevelFilter},
    fmt::FormatEvent,
    prelude::*,
};

use crate::{prelude::*, args::Args};


#[derive(Debug, confique::Config)]
pub(crate) struct LogConfig {
    /// Specifies what log messages to emit, based on the module path and log level.
    ///
    /// This is a map where the key specifies a module path prefix, and the
    /// value specifies a minimum log level. For each log message, the map
    /// entry with the longest prefix matching the log's module path is chosen.
    /// If no such entry exists, the log is not emitted. Otherwise, that
    /// entry's level is used to check whether the log message should be
    /// emitted.
    ///
    /// Example: only ≥"info" logs from linkboard generally, but ≥"trace"
    /// from the DB layer and ≥"debug" from the HTTP library `hyper`.
    ///
    ///    [log]
    ///    filters.linkboard = "info"
    ///    filters."linkboard::db" = "trace"
    ///    filters.hyper = "debug"
    #[config(default = { "linkboard": "debug" })]
    pub(crate) filters: Filters,

    /// If this is set, log messages are also written to this file. The string
    /// `${cmd}` in this value is replaced by the subcommand name, e.g. `serve`
    /// or `other`. Example: "/var/log/linkboard-${cmd}.log".
    pub(crate) file: Option<PathBuf>,

    /// If this is set to `false`, log messages are not written to stdout.
    #[config(default = true)]
    pub(crate) stdout: bool,
}

#[derive(Debug, Deserialize)]
#[serde(try_from = "HashMap<String, String>")]
pub(crate) struct Filters(HashMap<String, LevelFilter>);

impl TryFrom<HashMap<String, String>> for Filters {
    type Error = String;
    fn try_from(value: HashMap<String, String>) -> Result<Self, Self::Error> {
        value.into_iter()
            .map(|(target_prefix, level)| Ok((target_prefix, parse_level_filter(&level)?)))
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

impl Filters {
    /// Returns the level of the entry with the longest prefix of `target`.
    fn level_for(&self, target: &str) -> Option<LevelFilter> {
        self.0.iter()
            .filter(|(prefix, _)| target.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, level)| *level)
    }

    fn max_level(&self) -> LevelFilter {
        self.0.values().max().copied().unwrap_or(LevelFilter::OFF)
    }
}

fn parse_level_filter(s: &str) -> Result<LevelFilter, String> {
    match s {
        "off" => Ok(LevelFilter::OFF),
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        other => Err(format!("invalid log level '{other}'")),
    }
}

/// Installs our own logger globally. Must only be called once!
pub(crate) fn init(config: &LogConfig, args: &Args, cmd: &str) -> Result<()> {
    let filter = {
        let filters = Filters(config.filters.0.clone());
        let max_level = filters.max_level();
        FilterFn::new(move |metadata| {
            filters.level_for(metadata.target())
                .is_some_and(|level| metadata.level() <= &level)
        }).with_max_level_hint(max_level)
    };

    let stdout_color = args.stdout_color();
    let stdout_output = config.stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .event_format(EventFormatter(stdout_color))
            .with_writer(std::io::stdout)
    });

    let file_output = config.file.as_ref()
        .map(|path| -> Result<std::fs::File> {
            use std::io::Write;

            let new_path = path.to_str()
                .ok_or_else(|| anyhow!("log file path is not valid UTF-8"))?
                .replace("${cmd}", cmd);

            let mut file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(new_path)
                .with_context(|| format!("failed to open/create log file '{}'", path.display()))?;

            // Empty line to make process restarts visible.
            file.write_all(b"\n").context("could not write to log file")?;

            Ok(file)
        })
        .transpose()?
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .event_format(EventFormatter(ColorChoice::Never))
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_output)
        .with(stdout_output)
        .init();

    Ok(())
}

type TracingWriter<'a> = tracing_subscriber::fmt::format::Writer<'a>;

/// Prints `<time> <level> <target> >  <message> ~~ key=value ...`.
#[derive(Clone, Copy)]
struct EventFormatter(ColorChoice);

impl<S, N> FormatEvent<S, N> for EventFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: TracingWriter<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let use_ansi = self.0 == ColorChoice::Always
            || (writer.has_ansi_escapes() && self.0 != ColorChoice::Never);

        // Events forwarded from the `log` crate carry their real metadata in fields.
        let normalized_metadata = event.normalized_metadata();
        let metadata = normalized_metadata.as_ref().unwrap_or(event.metadata());

        let dim_style = Style::new().dimmed();
        let (level_style, body_style) = match *metadata.level() {
            Level::ERROR => (Style::new().fg(Color::Red).bold(), Style::new().fg(Color::Red)),
            Level::WARN => (Style::new().fg(Color::Yellow).bold(), Style::new().fg(Color::Yellow)),
            Level::INFO => (Style::new().fg(Color::Green), Style::new()),
            Level::DEBUG => (Style::new().fg(Color::Blue), Style::new().dimmed()),
            Level::TRACE => (Style::new().fg(Color::Magenta), Style::new().fg(Color::DarkGray)),
        };

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let styled = |style: Style, s: &str| -> String {
            if use_ansi { style.paint(s).to_string() } else { s.to_owned() }
        };

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S.%3f").to_string();
        write!(writer, "{} ", styled(dim_style, &now))?;
        write!(writer, "{}", styled(level_style, &format!("{:5}", metadata.level())))?;
        write!(writer, "{}", styled(dim_style, &format!(" {} >  ", metadata.target())))?;
        write!(writer, "{}", styled(body_style, &fields.message))?;

        if !fields.rest.is_empty() {
            if !fields.message.is_empty() {
                write!(writer, "{}", styled(level_style, " ~~ "))?;
            }
            let rest = fields.rest.iter()
                .map(|(name, value)| format!("{}={value}", styled(body_style.italic(), name)))
                .collect::<Vec<_>>()
                .join(" ");
            write!(writer, "{rest}")?;
        }

        writeln!(writer)
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    rest: Vec<(&'static str, String)>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => {
                let _ = write!(self.message, "{value:?}");
            }
            name if name.starts_with("log.") => {}
            name => self.rest.push((name, format!("{value:?}"))),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use tracing_subscriber::filter::LevelFilter;

    use super::Filters;

    fn filters(entries: &[(&str, &str)]) -> Filters {
        let raw = entries.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Filters::try_from(raw).unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let f = filters(&[
            ("linkboard", "info"),
            ("linkboard::db", "trace"),
            ("linkboard::db::migrations", "off"),
        ]);

        assert_eq!(f.level_for("linkboard::api"), Some(LevelFilter::INFO));
        assert_eq!(f.level_for("linkboard::db::store"), Some(LevelFilter::TRACE));
        assert_eq!(f.level_for("linkboard::db::migrations"), Some(LevelFilter::OFF));
        assert_eq!(f.level_for("hyper::proto"), None);
        assert_eq!(f.max_level(), LevelFilter::TRACE);
    }

    #[test]
    fn invalid_level_is_rejected() {
        let raw = HashMap::from([("linkboard".to_string(), "verbose".to_string())]);
        assert_eq!(
            Filters::try_from(raw).err(),
            Some("invalid log level 'verbose'".to_string()),
        );
    }

    #[test]
    fn empty_filters_emit_nothing() {
        let f = filters(&[]);
        assert_eq!(f.max_level(), LevelFilter::OFF);
        assert_eq!(f.level_for("linkboard"), None);
    }
}
