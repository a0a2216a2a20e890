use std::time::Duration;

use anyhow::Result;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::verif;

/// How long a rejected peer may keep sending before the socket is dropped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How a session ended when it did not end on an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The peer closed its side.
    Disconnected,
    /// A malformed request was answered with a diagnostic and the
    /// connection closed.
    Malformed,
}

enum Record {
    Line,
    TooLong(usize),
    Eof,
}

/// Serves `isPrime` requests on one duplex stream, strictly in order, until
/// the peer leaves or sends something malformed.
pub struct Session<S> {
    stream: BufReader<S>,
    max_line_length: Option<usize>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            max_line_length: None,
        }
    }

    pub fn with_max_line_length(mut self, max_line_length: Option<usize>) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Runs the session to completion and closes the stream whatever the
    /// outcome. Errors stay here.
    pub async fn start(mut self) {
        let outcome = self.run().await;
        match &outcome {
            Ok(Outcome::Disconnected) => info!("Client disconnected"),
            Ok(Outcome::Malformed) => info!("Client dropped after malformed request"),
            Err(e) => error!("Client errored: {e}"),
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown failed: {e}");
        }
        if let Ok(Outcome::Malformed) = outcome {
            self.drain().await;
        }
    }

    /// Swallows whatever the peer still sends after our write side is
    /// closed. Dropping a socket with unread input resets the connection,
    /// which can destroy the diagnostic before the peer reads it.
    async fn drain(&mut self) {
        match timeout(DRAIN_TIMEOUT, io::copy(&mut self.stream, &mut io::sink())).await {
            Ok(Ok(read)) => debug!("Drained {read} bytes"),
            Ok(Err(e)) => debug!("Drain failed: {e}"),
            Err(_) => debug!("Peer still open after {DRAIN_TIMEOUT:?}"),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&mut self) -> Result<Outcome> {
        let mut buf = Vec::new();
        loop {
            let err = match self.read_record(&mut buf).await? {
                Record::Eof => return Ok(Outcome::Disconnected),
                Record::TooLong(limit) => verif::Error::LineTooLong(limit),
                Record::Line => match classify(std::mem::take(&mut buf)).await? {
                    Ok(resp) => {
                        debug!("Answering {}", String::from_utf8_lossy(&resp).trim_end());
                        self.stream.write_all(&resp).await?;
                        self.stream.flush().await?;
                        continue;
                    }
                    Err(err) => err,
                },
            };
            warn!("Failed! {err}");
            self.stream.write_all(format!("{err}\n").as_bytes()).await?;
            self.stream.flush().await?;
            return Ok(Outcome::Malformed);
        }
    }

    /// Fills `buf` with the next record, newline stripped. Bytes left over
    /// when the peer closes mid-record are dropped.
    async fn read_record(&mut self, buf: &mut Vec<u8>) -> Result<Record> {
        buf.clear();
        let read = match self.max_line_length {
            Some(limit) => {
                let mut limited = (&mut self.stream).take((limit as u64).saturating_add(1));
                limited.read_until(b'\n', buf).await?
            }
            None => self.stream.read_until(b'\n', buf).await?,
        };
        debug!("Read {read} bytes");
        if buf.last() == Some(&b'\n') {
            buf.pop();
            return Ok(Record::Line);
        }
        match self.max_line_length {
            Some(limit) if buf.len() > limit => Ok(Record::TooLong(limit)),
            _ => Ok(Record::Eof),
        }
    }
}

/// Primality of a big literal is CPU-bound, so it runs on the blocking pool
/// instead of the worker that polls other sessions.
async fn classify(record: Vec<u8>) -> Result<Result<Vec<u8>, verif::Error>> {
    Ok(task::spawn_blocking(move || verif::process_request(&record)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};
    use tokio::task::JoinHandle;

    fn spawn_session(max_line_length: Option<usize>) -> (DuplexStream, JoinHandle<Outcome>) {
        let (client, server) = duplex(64 * 1024);
        let handle = tokio::spawn(async move {
            let mut session = Session::new(server).with_max_line_length(max_line_length);
            session.run().await.unwrap()
        });
        (client, handle)
    }

    async fn exchange(input: &[u8], max_line_length: Option<usize>) -> (String, Outcome) {
        let (mut client, handle) = spawn_session(max_line_length);
        client.write_all(input).await.unwrap();
        let outcome = handle.await.unwrap();
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        (output, outcome)
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let (mut client, handle) = spawn_session(None);
        client
            .write_all(
                b"{\"method\":\"isPrime\",\"number\":2}\n\
                  {\"method\":\"isPrime\",\"number\":4}\n\
                  {\"method\":\"isPrime\",\"number\":17,\"extra\":1}\n",
            )
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(
            output,
            "{\"method\":\"isPrime\",\"prime\":true}\n\
             {\"method\":\"isPrime\",\"prime\":false}\n\
             {\"method\":\"isPrime\",\"prime\":true}\n"
        );
    }

    #[tokio::test]
    async fn malformed_request_ends_the_session() {
        let (output, outcome) = exchange(
            b"{\"method\":\"isPrime\",\"number\":7}\n\
              {\"method\":\"isPrime\",\"number\":\"7\"}\n\
              {\"method\":\"isPrime\",\"number\":11}\n",
            None,
        )
        .await;
        assert_eq!(outcome, Outcome::Malformed);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2, "{output:?}");
        assert_eq!(lines[0], "{\"method\":\"isPrime\",\"prime\":true}");
        assert!(lines[1].starts_with("malformed request"));
    }

    #[tokio::test]
    async fn every_malformed_shape_gets_one_diagnostic() {
        let inputs: [&[u8]; 5] = [
            b"{\"method\":\"isPrime\"}\n",
            b"{\"method\":\"notPrime\",\"number\":5}\n",
            b"{\"number\":5}\n",
            b"{\"method\":\"isPrime\",\"number\":}\n",
            b"not json at all\n",
        ];
        for input in inputs {
            let (output, outcome) = exchange(input, None).await;
            assert_eq!(outcome, Outcome::Malformed);
            assert_eq!(output.lines().count(), 1);
            assert!(output.starts_with("malformed request"), "{output:?}");
        }
    }

    #[tokio::test]
    async fn eof_mid_record_is_a_clean_disconnect() {
        let (mut client, handle) = spawn_session(None);
        client
            .write_all(b"{\"method\":\"isPrime\",\"number\":3}\n{\"method\":\"isPr")
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "{\"method\":\"isPrime\",\"prime\":true}\n");
    }

    #[tokio::test]
    async fn empty_stream_disconnects_without_output() {
        let (mut client, handle) = spawn_session(None);
        client.shutdown().await.unwrap();
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);
        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn long_lines_are_accepted_by_default() {
        let padding = "x".repeat(100_000);
        let request = format!("{{\"method\":\"isPrime\",\"number\":13,\"pad\":\"{padding}\"}}\n");
        let (mut client, handle) = spawn_session(None);
        let writer = tokio::spawn(async move {
            client.write_all(request.as_bytes()).await.unwrap();
            client.shutdown().await.unwrap();
            let mut output = String::new();
            client.read_to_string(&mut output).await.unwrap();
            output
        });
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);
        assert_eq!(writer.await.unwrap(), "{\"method\":\"isPrime\",\"prime\":true}\n");
    }

    #[tokio::test]
    async fn carriage_return_before_newline_is_tolerated() {
        let (mut client, handle) = spawn_session(None);
        client
            .write_all(
                b"{\"method\":\"isPrime\",\"number\":7}\r\n\
                  {\"method\":\"isPrime\",\"number\":9}\r\n",
            )
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(
            output,
            "{\"method\":\"isPrime\",\"prime\":true}\n\
             {\"method\":\"isPrime\",\"prime\":false}\n"
        );
    }

    #[tokio::test]
    async fn largest_line_cap_does_not_overflow() {
        let (mut client, handle) = spawn_session(Some(usize::MAX));
        client
            .write_all(b"{\"method\":\"isPrime\",\"number\":13}\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "{\"method\":\"isPrime\",\"prime\":true}\n");
    }

    #[tokio::test]
    async fn rejected_peer_is_drained_before_close() {
        let (mut client, server) = duplex(64 * 1024);
        let handle = tokio::spawn(Session::new(server).start());
        client
            .write_all(b"nonsense\n{\"method\":\"isPrime\",\"number\":5}\nmore\n")
            .await
            .unwrap();

        // Our write side is shut down first, so the diagnostic ends in EOF
        // while the session keeps reading.
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(output.lines().count(), 1, "{output:?}");
        assert!(output.starts_with("malformed request"));
        assert!(!handle.is_finished());

        client.write_all(b"still talking\n").await.unwrap();
        client.shutdown().await.unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn line_cap_rejects_longer_records() {
        let request = b"{\"method\":\"isPrime\",\"number\":13}\n";
        let exact = request.len() - 1;

        let (output, outcome) = exchange(request, Some(exact - 1)).await;
        assert_eq!(outcome, Outcome::Malformed);
        assert!(output.starts_with("malformed request"), "{output:?}");

        let (mut client, handle) = spawn_session(Some(exact));
        client.write_all(request).await.unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(handle.await.unwrap(), Outcome::Disconnected);
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "{\"method\":\"isPrime\",\"prime\":true}\n");
    }
}
