//! Service calls read from stdin
//!
//! One call per line: a service name followed by its arguments. Arguments
//! are checked against the matrix size here, so a typo is reported back
//! instead of being silently ignored by the controller.

use matrix_control::{Connector, ControlError, MatrixController};
use matrix_protocol::MatrixSize;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors parsing or running a service call
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("{service}: missing argument '{argument}'")]
    MissingArgument {
        service: String,
        argument: &'static str,
    },

    #[error("{service}: unexpected argument '{value}'")]
    UnexpectedArgument { service: String, value: String },

    #[error("invalid {argument} '{value}': {reason}")]
    InvalidArgument {
        argument: &'static str,
        value: String,
        reason: String,
    },

    #[error("{argument} {value} is out of range 1..={max}")]
    OutOfRange {
        argument: &'static str,
        value: u32,
        max: u8,
    },

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// A validated service call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    SetRoute { output: u8, input: u8 },
    OutputOn { output: u8 },
    OutputOff { output: u8 },
    NextInput { output: u8 },
    PrevInput { output: u8 },
    SystemPower { on: bool },
    SendRaw { data: Vec<u8> },
    FactoryReset,
    Refresh,
    QueryInfo,
    State,
}

impl ServiceCall {
    /// Parse one input line; `Ok(None)` for blank lines and `#` comments
    pub fn parse(line: &str, size: MatrixSize) -> Result<Option<Self>, ServiceError> {
        let line = line.trim_start();
        if line.trim_end().is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (line, ""),
        };

        // send_raw takes the rest of the line verbatim, trailing spaces included
        if name == "send_raw" {
            if rest.is_empty() {
                return Err(ServiceError::MissingArgument {
                    service: name.to_string(),
                    argument: "data",
                });
            }
            return Ok(Some(Self::SendRaw {
                data: decode_escapes(rest)?,
            }));
        }

        let mut args = Args {
            service: name,
            tokens: rest.split_whitespace(),
        };

        let call = match name {
            "set_route" => {
                let output = args.index("output", size)?;
                let input = args.index("input", size)?;
                Self::SetRoute { output, input }
            }
            "output_on" => Self::OutputOn {
                output: args.index("output", size)?,
            },
            "output_off" => Self::OutputOff {
                output: args.index("output", size)?,
            },
            "next_input" => Self::NextInput {
                output: args.index("output", size)?,
            },
            "prev_input" => Self::PrevInput {
                output: args.index("output", size)?,
            },
            "system_power" => {
                let value = args.next("state")?;
                Self::SystemPower {
                    on: parse_bool(value)?,
                }
            }
            "factory_reset" => Self::FactoryReset,
            "refresh" => Self::Refresh,
            "query_info" => Self::QueryInfo,
            "state" => Self::State,
            other => return Err(ServiceError::UnknownService(other.to_string())),
        };

        args.finish()?;
        Ok(Some(call))
    }

    /// Service name
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetRoute { .. } => "set_route",
            Self::OutputOn { .. } => "output_on",
            Self::OutputOff { .. } => "output_off",
            Self::NextInput { .. } => "next_input",
            Self::PrevInput { .. } => "prev_input",
            Self::SystemPower { .. } => "system_power",
            Self::SendRaw { .. } => "send_raw",
            Self::FactoryReset => "factory_reset",
            Self::Refresh => "refresh",
            Self::QueryInfo => "query_info",
            Self::State => "state",
        }
    }

    /// Run the call against a controller
    ///
    /// Returns the result payload to print; I/O errors are returned, not
    /// fatal.
    pub async fn execute<C: Connector>(
        self,
        controller: &MatrixController<C>,
    ) -> Result<Value, ServiceError> {
        match self {
            Self::SetRoute { output, input } => controller.set_route(output, input).await?,
            Self::OutputOn { output } => controller.output_on(output).await?,
            Self::OutputOff { output } => controller.output_off(output).await?,
            Self::NextInput { output } => controller.next_input(output).await?,
            Self::PrevInput { output } => controller.prev_input(output).await?,
            Self::SystemPower { on } => controller.system_power(on).await?,
            Self::SendRaw { data } => controller.send_raw(&data).await?,
            Self::FactoryReset => controller.factory_reset().await?,
            Self::Refresh => controller.force_refresh().await?,
            Self::QueryInfo => {
                controller.query_info().await;
                return Ok(json!({
                    "firmware": controller.firmware(),
                    "ip_address": controller.ip_address(),
                }));
            }
            Self::State => return Ok(state_report(controller)),
        }
        Ok(json!({ "ok": true }))
    }
}

/// Everything a dashboard would show about the matrix
pub fn state_report<C: Connector>(controller: &MatrixController<C>) -> Value {
    json!({
        "identity": controller.identity(),
        "size": controller.size(),
        "state": controller.snapshot(),
        "configuration_url": controller.configuration_url(),
    })
}

/// Cursor over a call's arguments
struct Args<'a> {
    service: &'a str,
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn next(&mut self, argument: &'static str) -> Result<&'a str, ServiceError> {
        self.tokens
            .next()
            .ok_or_else(|| ServiceError::MissingArgument {
                service: self.service.to_string(),
                argument,
            })
    }

    fn index(&mut self, argument: &'static str, size: MatrixSize) -> Result<u8, ServiceError> {
        let text = self.next(argument)?;
        let value: u32 = text.parse().map_err(|e: std::num::ParseIntError| {
            ServiceError::InvalidArgument {
                argument,
                value: text.to_string(),
                reason: e.to_string(),
            }
        })?;

        let max = size.dimension();
        match u8::try_from(value) {
            Ok(index) if size.contains(index) => Ok(index),
            _ => Err(ServiceError::OutOfRange {
                argument,
                value,
                max,
            }),
        }
    }

    fn finish(mut self) -> Result<(), ServiceError> {
        match self.tokens.next() {
            Some(extra) => Err(ServiceError::UnexpectedArgument {
                service: self.service.to_string(),
                value: extra.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Parse a boolean service argument
pub fn parse_bool(value: &str) -> Result<bool, ServiceError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(ServiceError::InvalidArgument {
            argument: "state",
            value: value.to_string(),
            reason: "expected on/off".to_string(),
        }),
    }
}

/// Turn `send_raw` text into bytes
///
/// Supports `\r`, `\n`, `\\` and `\xHH`. Other characters are sent as
/// Latin-1, so anything above U+00FF is rejected.
pub fn decode_escapes(text: &str) -> Result<Vec<u8>, ServiceError> {
    let invalid = |reason: &str| ServiceError::InvalidArgument {
        argument: "data",
        value: text.to_string(),
        reason: reason.to_string(),
    };

    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let byte = u8::try_from(u32::from(c))
                .map_err(|_| invalid("character outside Latin-1"))?;
            out.push(byte);
            continue;
        }

        match chars.next() {
            Some('r') => out.push(b'\r'),
            Some('n') => out.push(b'\n'),
            Some('\\') => out.push(b'\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = (hex.len() == 2)
                    .then(|| u8::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .ok_or_else(|| invalid("\\x needs two hex digits"))?;
                out.push(byte);
            }
            Some(other) => return Err(invalid(&format!("unknown escape \\{other}"))),
            None => return Err(invalid("trailing backslash")),
        }
    }

    Ok(out)
}
