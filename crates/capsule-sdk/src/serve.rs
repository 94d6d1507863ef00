//! Unit-side request loop

use std::io::{self, BufRead, Write};

use anyhow::Result;
use serde_json::Value;

use crate::protocol::{Descriptor, InitContext, Request, Response};
use crate::schema::FunctionSchema;

/// The contract every capability unit implements
pub trait Capability {
    /// Prepare the capability; called once before any `execute`
    fn init(&mut self, ctx: &InitContext) -> Result<()>;

    /// Unique id, also used as the function name
    fn id(&self) -> String;

    fn description(&self) -> String;

    fn function_schema(&self) -> FunctionSchema;

    /// Run with JSON-encoded arguments and return a textual result
    fn execute(&mut self, arguments: &str) -> Result<String>;
}

/// Serve requests on stdin/stdout until the host closes the pipe
pub fn serve<C: Capability>(capability: C) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_io(capability, stdin.lock(), stdout.lock())
}

/// Serve requests from any reader/writer pair
pub fn serve_io<C, R, W>(mut capability: C, reader: R, mut writer: W) -> io::Result<()>
where
    C: Capability,
    R: BufRead,
    W: Write,
{
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(&mut capability, request),
            Err(e) => Response::err(format!("malformed request: {}", e)),
        };

        let json = serde_json::to_string(&response).map_err(io::Error::other)?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

fn handle<C: Capability>(capability: &mut C, request: Request) -> Response {
    match request {
        Request::Describe => {
            let descriptor = Descriptor {
                id: capability.id(),
                description: capability.description(),
                schema: capability.function_schema(),
            };
            match serde_json::to_value(descriptor) {
                Ok(value) => Response::ok(value),
                Err(e) => Response::err(e.to_string()),
            }
        }
        Request::Init { context } => match capability.init(&context) {
            Ok(()) => Response::ok(Value::Null),
            Err(e) => Response::err(format!("{:#}", e)),
        },
        Request::Execute { arguments } => match capability.execute(&arguments) {
            Ok(result) => Response::ok(Value::String(result)),
            Err(e) => Response::err(format!("{:#}", e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParameterProperty, ParameterSchema};
    use anyhow::bail;

    struct Shout {
        initialized: bool,
    }

    impl Capability for Shout {
        fn init(&mut self, _ctx: &InitContext) -> Result<()> {
            self.initialized = true;
            Ok(())
        }

        fn id(&self) -> String {
            "shout".to_string()
        }

        fn description(&self) -> String {
            "Upper-cases text".to_string()
        }

        fn function_schema(&self) -> FunctionSchema {
            FunctionSchema::new(
                "shout",
                "Upper-case some text",
                ParameterSchema::new().with_required("text", ParameterProperty::string("Text")),
            )
        }

        fn execute(&mut self, arguments: &str) -> Result<String> {
            if !self.initialized {
                bail!("not initialized");
            }
            let args: serde_json::Value = serde_json::from_str(arguments)?;
            match args["text"].as_str() {
                Some(text) => Ok(text.to_uppercase()),
                None => bail!("text is required"),
            }
        }
    }

    fn run(input: &str) -> Vec<Response> {
        let mut out = Vec::new();
        serve_io(Shout { initialized: false }, input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_serve_full_exchange() {
        let input = concat!(
            "{\"method\":\"describe\"}\n",
            "{\"method\":\"init\",\"context\":{\"model\":\"m\",\"data_dir\":\".\"}}\n",
            "{\"method\":\"execute\",\"arguments\":\"{\\\"text\\\":\\\"hi\\\"}\"}\n",
        );

        let responses = run(input);
        assert_eq!(responses.len(), 3);

        let descriptor: Descriptor =
            serde_json::from_value(responses[0].result.clone().unwrap()).unwrap();
        assert_eq!(descriptor.id, "shout");
        assert!(descriptor.validate().is_ok());
        assert!(responses[1].error.is_none());
        assert_eq!(responses[2].result, Some(Value::String("HI".to_string())));
    }

    #[test]
    fn test_serve_reports_errors() {
        let input = concat!(
            "not json\n",
            "\n",
            "{\"method\":\"execute\",\"arguments\":\"{}\"}\n",
        );

        let responses = run(input);
        assert_eq!(responses.len(), 2);
        assert!(responses[0].error.as_ref().unwrap().contains("malformed request"));
        assert_eq!(responses[1].error.as_deref(), Some("not initialized"));
    }
}
