/// AirPlay control point
///
/// Commands are executed by a fixed pool of worker tasks so one slow or
/// unreachable receiver cannot hold up commands aimed at other receivers.
/// Each receiver has a single persistent socket, opened on first use and
/// reopened after any failure.
use super::codec::{self, AirplayCommand, CodecError, ContentParameters};
use mediacast_core::{AirplayConfig, AirplayConnection, AirplayDevice, AirplayStream};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ControlPointError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("device answered {code} {message}")]
    Status { code: u16, message: String },

    #[error("timed out waiting for device")]
    Timeout,

    #[error("device connection closed")]
    Closed,

    #[error("AirPlay control point is shut down")]
    PoolShutdown,
}

impl ControlPointError {
    /// Whether the socket is left in an unknown state
    fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ControlPointError::Io(_) | ControlPointError::Codec(_) | ControlPointError::Timeout
        )
    }
}

type Reply = oneshot::Sender<Result<ContentParameters, ControlPointError>>;

struct Job {
    device_id: String,
    host: String,
    port: u16,
    connection: Arc<AirplayConnection>,
    /// Exclusive use of the device socket, held from submission to reply
    slot: OwnedMutexGuard<AirplayStream>,
    command: AirplayCommand,
    reply: Reply,
}

#[derive(Clone, Copy)]
struct Timeouts {
    connect: Duration,
    command: Option<Duration>,
}

pub struct AirplayControlPoint {
    jobs: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl AirplayControlPoint {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn new(config: &AirplayConfig) -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let timeouts = Timeouts {
            connect: config.connect_timeout(),
            command: config.command_timeout(),
        };

        let pool_size = config.worker_pool_size.max(1);
        let workers = (0..pool_size)
            .map(|worker| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    worker_loop(worker, receiver, timeouts).await;
                })
            })
            .collect();

        info!("AirPlay control point started with {} workers", pool_size);
        Self { jobs, workers }
    }

    /// Run `command` against `device` and wait for its response parameters.
    ///
    /// Waiting for a device busy with an earlier command happens here, so
    /// queued commands for one slow device never occupy pool workers.
    pub async fn execute(
        &self,
        device: &AirplayDevice,
        command: AirplayCommand,
    ) -> Result<ContentParameters, ControlPointError> {
        let connection = device.connection().clone();
        if connection.is_closed() {
            return Err(ControlPointError::Closed);
        }

        let slot = tokio::select! {
            _ = connection.closed() => return Err(ControlPointError::Closed),
            slot = connection.lock_stream() => slot,
        };

        let (reply, response) = oneshot::channel();
        let job = Job {
            device_id: device.id.clone(),
            host: device.host.clone(),
            port: device.port,
            connection,
            slot,
            command,
            reply,
        };

        self.jobs
            .send(job)
            .map_err(|_| ControlPointError::PoolShutdown)?;
        response.await.map_err(|_| ControlPointError::PoolShutdown)?
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for AirplayControlPoint {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    timeouts: Timeouts,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(mut job) = job else {
            debug!("AirPlay worker {} exiting", worker);
            break;
        };

        debug!(
            "AirPlay worker {} running {} on {}",
            worker,
            job.command.name(),
            job.device_id
        );
        let result = run_job(&mut job, timeouts).await;
        if let Err(e) = &result {
            warn!(
                "AirPlay {} on {} failed: {}",
                job.command.name(),
                job.device_id,
                e
            );
        }

        // Release the socket before the caller can issue its next command
        let Job { slot, reply, .. } = job;
        drop(slot);
        if reply.send(result).is_err() {
            debug!("AirPlay command caller went away before the reply");
        }
    }
}

async fn run_job(job: &mut Job, timeouts: Timeouts) -> Result<ContentParameters, ControlPointError> {
    let result = if job.connection.is_closed() {
        Err(ControlPointError::Closed)
    } else {
        tokio::select! {
            _ = job.connection.closed() => Err(ControlPointError::Closed),
            result = exchange_on_connection(&mut job.slot, &job.host, job.port, &job.command, timeouts) => result,
        }
    };

    if matches!(result, Err(ControlPointError::Closed)) {
        // Closed while we held the socket, release what close() could not reach
        job.slot.take();
    }
    result
}

async fn exchange_on_connection(
    slot: &mut AirplayStream,
    host: &str,
    port: u16,
    command: &AirplayCommand,
    timeouts: Timeouts,
) -> Result<ContentParameters, ControlPointError> {
    let pending = exchange(slot, host, port, command, timeouts.connect);
    let result = match timeouts.command {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .unwrap_or(Err(ControlPointError::Timeout)),
        None => pending.await,
    };

    if let Err(e) = &result {
        if e.breaks_connection() && slot.take().is_some() {
            debug!("Dropped AirPlay socket to {}:{}", host, port);
        }
    }
    result
}

async fn exchange(
    slot: &mut AirplayStream,
    host: &str,
    port: u16,
    command: &AirplayCommand,
    connect_timeout: Duration,
) -> Result<ContentParameters, ControlPointError> {
    if slot.is_none() {
        debug!("Connecting to AirPlay device at {}:{}", host, port);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ControlPointError::Timeout)??;
        *slot = Some(BufReader::new(stream));
    }
    let Some(stream) = slot.as_mut() else {
        return Err(ControlPointError::Closed);
    };

    let request = command.encode();
    debug!("AirPlay request:\n{}", request);
    stream.get_mut().write_all(request.as_bytes()).await?;
    stream.get_mut().flush().await?;

    let response = codec::read_response(stream).await?;
    debug!(
        "AirPlay response: {} {} (headers: {:?})",
        response.code, response.message, response.headers
    );

    if !response.is_success() {
        return Err(ControlPointError::Status {
            code: response.code,
            message: response.message,
        });
    }
    Ok(response.into_parameters())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediacast_core::AirplayFeatures;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};
    use tokio::net::TcpListener;

    fn config() -> AirplayConfig {
        AirplayConfig {
            worker_pool_size: 2,
            connect_timeout_secs: 2,
            command_timeout_secs: 2,
        }
    }

    fn device(port: u16) -> AirplayDevice {
        AirplayDevice::new("airplay:test", "Test TV", "127.0.0.1", port, AirplayFeatures::default())
    }

    /// Read one request (headers + Content-Length body) from a test socket
    async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
        let mut request = String::new();
        let mut length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.ok()? == 0 {
                return None;
            }
            if let Some(value) = line.strip_prefix("Content-Length: ") {
                length = value.trim().parse().ok()?;
            }
            request.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.ok()?;
        request.push_str(&String::from_utf8_lossy(&body));
        Some(request)
    }

    #[tokio::test]
    async fn test_execute_reuses_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut requests = Vec::new();
            while let Some(request) = read_request(&mut reader).await {
                let body = "duration: 120.0\nposition: 30.0\n";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/parameters\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                reader.get_mut().write_all(response.as_bytes()).await.unwrap();
                requests.push(request);
                if requests.len() == 2 {
                    break;
                }
            }
            requests
        });

        let control_point = AirplayControlPoint::new(&config());
        assert_eq!(control_point.worker_count(), 2);
        let device = device(port);

        let first = control_point
            .execute(&device, AirplayCommand::PlaybackStatus)
            .await
            .unwrap();
        assert_eq!(first["duration"], "120.0");
        assert_eq!(first["position"], "30.0");

        control_point
            .execute(&device, AirplayCommand::Rate { value: 0.0 })
            .await
            .unwrap();

        // Both requests arrived on the single accepted socket
        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /scrub HTTP/1.1\r\n"));
        assert!(requests[1].starts_with("POST /rate?value=0.000000 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            if read_request(&mut reader).await.is_some() {
                let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                reader.get_mut().write_all(response.as_bytes()).await.unwrap();
            }
            // Keep the socket open until the client is done
            let _ = read_request(&mut reader).await;
        });

        let control_point = AirplayControlPoint::new(&config());
        let err = control_point
            .execute(&device(port), AirplayCommand::Stop)
            .await
            .unwrap_err();
        match err {
            ControlPointError::Status { code, message } => {
                assert_eq!(code, 404);
                assert_eq!(message, "Not Found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let control_point = AirplayControlPoint::new(&config());
        let device = device(port);
        let err = control_point
            .execute(&device, AirplayCommand::Stop)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlPointError::Io(_) | ControlPointError::Timeout
        ));
        assert!(device.connection().stream().lock().await.is_none());
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_reset() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            // First connection: hang up without answering
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let _ = read_request(&mut reader).await;
            drop(reader);

            // Second connection: answer properly
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            if read_request(&mut reader).await.is_some() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
                reader.get_mut().write_all(response.as_bytes()).await.unwrap();
            }
            let _ = read_request(&mut reader).await;
        });

        let control_point = AirplayControlPoint::new(&config());
        let device = device(port);

        assert!(control_point
            .execute(&device, AirplayCommand::Stop)
            .await
            .is_err());
        let parameters = control_point
            .execute(&device, AirplayCommand::Stop)
            .await
            .unwrap();
        assert!(parameters.is_empty());
    }

    #[tokio::test]
    async fn test_close_aborts_pending_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            // Read the request and never answer
            let _ = read_request(&mut reader).await;
            let _ = read_request(&mut reader).await;
        });

        let control_point = Arc::new(AirplayControlPoint::new(&AirplayConfig {
            command_timeout_secs: 0,
            ..config()
        }));
        let device = Arc::new(device(port));

        let pending = {
            let control_point = control_point.clone();
            let device = device.clone();
            tokio::spawn(async move {
                control_point
                    .execute(&device, AirplayCommand::PlaybackStatus)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        device.connection().close();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("close should unblock the command")
            .unwrap();
        assert!(matches!(result, Err(ControlPointError::Closed)));

        // Later commands fail fast
        assert!(matches!(
            control_point
                .execute(&device, AirplayCommand::Stop)
                .await,
            Err(ControlPointError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_hung_device_does_not_starve_others() {
        // Receiver that reads requests and never answers
        let hung = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hung_port = hung.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = hung.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            while read_request(&mut reader).await.is_some() {}
        });

        // Receiver that answers immediately
        let fast = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fast_port = fast.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = fast.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            while read_request(&mut reader).await.is_some() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
                if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let control_point = Arc::new(AirplayControlPoint::new(&AirplayConfig {
            worker_pool_size: 2,
            connect_timeout_secs: 2,
            command_timeout_secs: 30,
        }));
        let hung_device = Arc::new(AirplayDevice::new(
            "airplay:hung",
            "Hung TV",
            "127.0.0.1",
            hung_port,
            AirplayFeatures::default(),
        ));

        // More queued commands for the hung device than there are workers
        let mut stuck = Vec::new();
        for _ in 0..4 {
            let control_point = control_point.clone();
            let device = hung_device.clone();
            stuck.push(tokio::spawn(async move {
                control_point
                    .execute(&device, AirplayCommand::PlaybackStatus)
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fast_device = AirplayDevice::new(
            "airplay:fast",
            "Fast TV",
            "127.0.0.1",
            fast_port,
            AirplayFeatures::default(),
        );
        let result = tokio::time::timeout(
            Duration::from_millis(500),
            control_point.execute(&fast_device, AirplayCommand::Stop),
        )
        .await
        .expect("the second device should be served while the first hangs");
        assert!(result.unwrap().is_empty());
        assert!(stuck.iter().all(|task| !task.is_finished()));

        // Removing the hung device releases every queued command
        hung_device.connection().close();
        for task in stuck {
            let result = tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .expect("close should release queued commands")
                .unwrap();
            assert!(matches!(result, Err(ControlPointError::Closed)));
        }
    }
}
