use std::time::Duration;
use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;

use crate::models::MeterReading;
use crate::parser::StreamParser;
use crate::supervisor::SupervisorError;

/// Reads decoder lines until one carries a reading of a configured meter.
///
/// Malformed lines and unknown meters are skipped. With a `timeout` the
/// whole search fails once no reading arrived within that time.
pub async fn next_reading<R>(stream: &mut R, parser: &StreamParser, timeout: Option<Duration>) -> Result<MeterReading, SupervisorError>
where
    R: AsyncBufRead + Unpin,
{
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut buf = Vec::new();

    loop {
        /* bytes that are not UTF-8 are a bad line, not a broken pipe */
        buf.clear();
        let next = match deadline {
            Some(d) => match tokio::time::timeout_at(d, stream.read_until(b'\n', &mut buf)).await {
                Ok(r) => r,
                Err(_) => return Err(SupervisorError::ReadTimeout(timeout.unwrap_or_default())),
            },
            None => stream.read_until(b'\n', &mut buf).await,
        };

        match next {
            Ok(0) => return Err(SupervisorError::StreamEnded),
            Ok(_) => {}
            Err(e) => return Err(SupervisorError::Stream(e)),
        }

        debug!("Decoder: {}", String::from_utf8_lossy(&buf).trim_end());
        match parser.parse_bytes(&buf) {
            Ok(Some(reading)) => return Ok(reading),
            Ok(None) => debug!("No reading in decoder line"),
            Err(e) => warn!("Skipping decoder line ({} fault): {e}", e.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeterConfig;
    use crate::models::LineFormat;
    use tokio::io::BufReader;

    fn parser(format: LineFormat) -> StreamParser {
        let meter = MeterConfig {
            id: "12345678".to_string(),
            protocol: "scm".to_string(),
            name: None,
            unit_of_measurement: None,
            icon: None,
            format: None,
        };
        return StreamParser::new(format, &[meter]);
    }

    #[tokio::test]
    async fn test_skips_bad_lines() {
        let input = "garbage\n\
                     t,0,0,0,0,0,87654321,999,0,0\n\
                     a,b,c,d,e,f,12345678,042\n\
                     2020-01-01 00:00:00,0,0,0,0,0,12345678,042,0,0\n";
        let mut stream = BufReader::new(input.as_bytes());
        let p = parser(LineFormat::Csv);

        let reading = next_reading(&mut stream, &p, None).await.unwrap();
        assert_eq!(reading.meter_id, "12345678");
        assert_eq!(reading.value, "042");

        /* nothing left */
        assert!(matches!(next_reading(&mut stream, &p, None).await, Err(SupervisorError::StreamEnded)));
    }

    #[tokio::test]
    async fn test_skips_undecodable_bytes() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(b"2020-01-01 00:00:00,0,0,0,0,0,12345678,042,0,0\n");
        let mut stream = BufReader::new(input.as_slice());
        let p = parser(LineFormat::Csv);

        let reading = next_reading(&mut stream, &p, None).await.unwrap();
        assert_eq!(reading.meter_id, "12345678");
        assert_eq!(reading.value, "042");
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let input = "2020-01-01 00:00:00,0,0,0,0,0,12345678,043,0,0";
        let mut stream = BufReader::new(input.as_bytes());
        let p = parser(LineFormat::Csv);

        assert_eq!(next_reading(&mut stream, &p, None).await.unwrap().value, "043");
        assert!(matches!(next_reading(&mut stream, &p, None).await, Err(SupervisorError::StreamEnded)));
    }

    #[tokio::test]
    async fn test_readings_keep_order() {
        let input = "{\"Message\":{\"ID\":12345678,\"Consumption\":1}}\n\
                     {\"Message\":{}}\n\
                     {\"Message\":{\"EndpointID\":\"12345678\",\"Consumption\":\"2\"}}\n";
        let mut stream = BufReader::new(input.as_bytes());
        let p = parser(LineFormat::Json);

        assert_eq!(next_reading(&mut stream, &p, None).await.unwrap().value, "1");
        assert_eq!(next_reading(&mut stream, &p, None).await.unwrap().value, "2");
    }

    #[tokio::test]
    async fn test_timeout_without_output() {
        let (_writer, reader) = tokio::io::duplex(64);
        let mut stream = BufReader::new(reader);
        let p = parser(LineFormat::Csv);

        let err = next_reading(&mut stream, &p, Some(Duration::from_millis(100))).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ReadTimeout(_)));
        assert!(err.suggests_hardware_fault());
    }

    #[tokio::test]
    async fn test_timeout_counts_skipped_lines() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(reader);
        let p = parser(LineFormat::Csv);

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"short,line\n").await.unwrap();

        let err = next_reading(&mut stream, &p, Some(Duration::from_millis(100))).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ReadTimeout(_)));
    }
}
