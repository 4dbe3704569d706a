// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::fmt::{self, Write as _};

use tracing::{Event, Subscriber, field};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

const DEFAULT_FILTER: &str = "info";

type BoxLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global subscriber. Must be called at most once per process.
pub fn setup_logging() {
    tracing_subscriber::registry()
        .with(fmt_layer().with_filter(env_filter()))
        .init();
}

fn fmt_layer() -> BoxLayer {
    if env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        let format = tracing_subscriber::fmt::format().json().flatten_event(true);
        Box::new(
            tracing_subscriber::fmt::layer()
                .event_format(format)
                .fmt_fields(format::JsonFields::default()),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .event_format(NetdFormat)
                .fmt_fields(NetdFormat),
        )
    }
}

fn env_filter() -> EnvFilter {
    let var = env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    EnvFilter::builder()
        .with_regex(false)
        .parse(&var)
        .unwrap_or_else(|e| {
            eprintln!("ignoring invalid {}={var}: {e}", EnvFilter::DEFAULT_ENV);
            EnvFilter::new(DEFAULT_FILTER)
        })
}

/// `<time>\t<level>\t<target>[:span{fields}]\t<message>[\t<k=v ...>]`
struct NetdFormat;

/// Splits an event's message from its structured fields.
#[derive(Default)]
struct Fields {
    message: String,
    rest: String,
}

impl field::Visit for Fields {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value)
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
            return;
        }
        if !self.rest.is_empty() {
            self.rest.push(' ');
        }
        let _ = write!(self.rest, "{}={value:?}", field.name());
    }
}

impl<'writer> FormatFields<'writer> for NetdFormat {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        mut writer: Writer<'writer>,
        fields: R,
    ) -> fmt::Result {
        let mut visitor = Fields::default();
        fields.record(&mut visitor);
        match (visitor.message.is_empty(), visitor.rest.is_empty()) {
            (true, _) => write!(writer, "{}", visitor.rest),
            (false, true) => write!(writer, "{}", visitor.message),
            (false, false) => write!(writer, "{}\t{}", visitor.message, visitor.rest),
        }
    }
}

impl<S, N> FormatEvent<S, N> for NetdFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        use tracing_log::NormalizeEvent;

        let normalized = event.normalized_metadata();
        let meta = normalized.as_ref().unwrap_or_else(|| event.metadata());
        SystemTime.format_time(&mut writer)?;
        let level = meta.level().to_string().to_ascii_lowercase();
        let target = meta.target();
        let target = target.strip_prefix("netd::").unwrap_or(target);
        write!(writer, "\t{level}\t{target}")?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, ":{}", span.metadata().name())?;
                if let Some(fields) = span.extensions().get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
            }
        }
        write!(writer, "\t")?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
