use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use ssh2::{ErrorCode, Session};

use super::{Credential, ExecOutput, ShellConnector, ShellError, ShellSession};

/// `LIBSSH2_ERROR_TIMEOUT`.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

const POLL_PAUSE: Duration = Duration::from_millis(10);

/// Password-authenticated SSH via libssh2. Host keys are not verified; the
/// guest is freshly installed and only reachable through a local forward.
pub struct SshConnector;

impl ShellConnector for SshConnector {
    fn connect(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Box<dyn ShellSession>, ShellError> {
        let addr = format!("{host}:{port}");
        let resolved = addr
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
                })
            })
            .map_err(|source| ShellError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let tcp = TcpStream::connect_timeout(&resolved, timeout)
            .map_err(|source| ShellError::Connect { addr, source })?;

        let mut session = Session::new()?;
        session.set_timeout(millis(timeout));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(timeout_or(timeout))?;

        if session
            .userauth_password(&credential.user, &credential.password)
            .is_err()
            || !session.authenticated()
        {
            return Err(ShellError::AuthRejected {
                user: credential.user.clone(),
            });
        }

        Ok(Box::new(SshSession { session }))
    }
}

struct SshSession {
    session: Session,
}

impl ShellSession for SshSession {
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ShellError> {
        self.session.set_timeout(millis(timeout));

        let mut channel = self.session.channel_session().map_err(timeout_or(timeout))?;
        channel.exec(command).map_err(timeout_or(timeout))?;

        self.session.set_blocking(false);
        let drained = drain(
            &mut channel.stream(0),
            &mut channel.stderr(),
            || channel.eof(),
            Instant::now() + timeout,
            timeout,
        );
        self.session.set_blocking(true);
        let (stdout, stderr) = drained?;

        channel.wait_close().map_err(timeout_or(timeout))?;
        let exit_code = channel.exit_status()?;

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn timeout_or(timeout: Duration) -> impl Fn(ssh2::Error) -> ShellError {
    move |e| match e.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => ShellError::Timeout(timeout),
        _ => ShellError::Ssh(e),
    }
}

/// Read both streams in turn until the remote side closes them, so a chatty
/// stderr cannot fill the channel window while stdout is being waited on.
/// Output is decoded lossily: guest tools occasionally emit non-UTF-8 bytes.
fn drain(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    eof: impl Fn() -> bool,
    deadline: Instant,
    timeout: Duration,
) -> Result<(String, String), ShellError> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let read_out = read_chunk(stdout, &mut out, &mut buf, timeout)?;
        let read_err = read_chunk(stderr, &mut err, &mut buf, timeout)?;
        if read_out || read_err {
            continue;
        }
        if eof() {
            break;
        }
        if Instant::now() >= deadline {
            return Err(ShellError::Timeout(timeout));
        }
        thread::sleep(POLL_PAUSE);
    }

    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// `true` when bytes were read. A non-blocking session reports "no data yet"
/// as `WouldBlock`.
fn read_chunk(
    reader: &mut impl Read,
    sink: &mut Vec<u8>,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<bool, ShellError> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(ShellError::Timeout(timeout)),
        Err(e) => Err(ShellError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_a_connect_error() {
        // Port 1 on loopback is reserved and closed in any sane environment.
        let err = SshConnector
            .connect(
                "127.0.0.1",
                1,
                &Credential::new("webuser", "pw"),
                Duration::from_millis(500),
            )
            .err()
            .unwrap();
        assert!(matches!(err, ShellError::Connect { .. }));
    }

    /// Hands out queued chunks; `None` entries stand for "no data yet".
    struct Chunks(std::collections::VecDeque<Option<Vec<u8>>>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(io::ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn stderr_is_read_while_stdout_is_idle() {
        // Far more stderr than a channel window, with stdout silent until the end.
        let mut stderr = Chunks((0..64).map(|_| Some(vec![b'E'; 4096])).collect());
        let mut stdout = Chunks((0..64).map(|_| None).chain([Some(b"done".to_vec())]).collect());

        let (out, err) = drain(
            &mut stdout,
            &mut stderr,
            || true,
            Instant::now() + Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(err.len(), 64 * 4096);
    }

    #[test]
    fn silent_command_times_out_at_deadline() {
        let idle = || Chunks((0..1000).map(|_| None).collect());
        let err = drain(
            &mut idle(),
            &mut idle(),
            || false,
            Instant::now() + Duration::from_millis(30),
            Duration::from_millis(30),
        )
        .unwrap_err();
        assert!(matches!(err, ShellError::Timeout(_)));
    }

    #[test]
    fn timeout_error_code_maps_to_timeout() {
        let e = ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT), "timed out");
        let mapped = timeout_or(Duration::from_secs(3))(e);
        assert!(matches!(mapped, ShellError::Timeout(d) if d == Duration::from_secs(3)));
    }
}
