use std::io::{self, Stdout, Write};

use thiserror::Error;

use crate::RiskEvent;

#[derive(Debug, Error)]
#[error("failed to write to the sink")]
pub struct SinkError(#[from] io::Error);

/// Destination for decoded events.
pub trait Sink {
    fn write(&mut self, event: &RiskEvent) -> Result<(), SinkError>;
}

/// Writes `customer,score` lines, flushing after each one.
pub struct ConsoleSink<W: Write = Stdout> {
    out: W,
}

impl ConsoleSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Sink for ConsoleSink<W> {
    fn write(&mut self, event: &RiskEvent) -> Result<(), SinkError> {
        // Debug keeps the fractional part of whole scores: 8.0, not 8
        writeln!(self.out, "{},{:?}", event.customer, event.score)?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn event(customer: &str, score: f64) -> RiskEvent {
        RiskEvent {
            customer: customer.to_string(),
            score,
            risk_date: NaiveDate::from_ymd_opt(2020, 9, 1).unwrap(),
        }
    }

    #[test]
    fn test_writes_customer_and_score() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.write(&event("sam@test.com", -1.4)).unwrap();
        sink.write(&event("a@b.com", 8.0)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "sam@test.com,-1.4\na@b.com,8.0\n");
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_an_error() {
        let mut sink = ConsoleSink::new(Broken);
        let err = sink.write(&event("a@b.com", 1.0)).unwrap_err();
        assert_eq!(err.to_string(), "failed to write to the sink");
    }
}
