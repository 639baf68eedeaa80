//! FTP, FTPS and SFTP feeds. Every operation opens its own connection and
//! closes it before returning, so concurrent downloads can never trample
//! each other's control or data channels.

use crate::{Artifact, FeedError, FilePattern, FileFeed, ScratchDir, ScratchFile};
use models::{ConfigError, FtpConfig, FtpProtocol, TestOutcome};
use std::fs;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{NativeTlsConnector, NativeTlsFtpStream};

pub struct FtpFeed {
    cfg: FtpConfig,
    pattern: FilePattern,
}

impl FtpFeed {
    pub fn new(cfg: &FtpConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            cfg: cfg.clone(),
            pattern: FilePattern::new(&cfg.file_pattern)?,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.timeout_secs.max(1))
    }
}

#[async_trait::async_trait]
impl FileFeed for FtpFeed {
    async fn test(&self) -> TestOutcome {
        match self.list().await {
            Ok(artifacts) => TestOutcome {
                ok: true,
                message: format!(
                    "connected to {}; {} file(s) match {:?}",
                    self.cfg.host,
                    artifacts.len(),
                    self.cfg.file_pattern,
                ),
                sample_count: Some(artifacts.len() as u64),
            },
            Err(err) => TestOutcome {
                ok: false,
                message: err.to_string(),
                sample_count: None,
            },
        }
    }

    #[tracing::instrument(skip(self), fields(host = %self.cfg.host))]
    async fn list(&self) -> Result<Vec<Artifact>, FeedError> {
        let cfg = self.cfg.clone();
        let pattern = self.pattern.clone();
        let timeout = self.timeout();
        let listing = tokio::task::spawn_blocking(move || match cfg.protocol {
            FtpProtocol::Ftp => ftp_list(&cfg, &pattern),
            FtpProtocol::Sftp => sftp_list(&cfg, &pattern),
        });
        match tokio::time::timeout(timeout, listing).await {
            Ok(joined) => joined.map_err(|err| FeedError::Protocol(err.to_string()))?,
            Err(_) => Err(FeedError::Timeout(timeout)),
        }
    }

    #[tracing::instrument(skip(self, scratch), fields(host = %self.cfg.host))]
    async fn download(&self, name: &str, scratch: &ScratchDir) -> Result<ScratchFile, FeedError> {
        let cfg = self.cfg.clone();
        let name = name.to_string();
        let dest = scratch.unique_path(&name);
        tokio::task::spawn_blocking(move || match cfg.protocol {
            FtpProtocol::Ftp => ftp_download(&cfg, &name, &dest),
            FtpProtocol::Sftp => sftp_download(&cfg, &name, &dest),
        })
        .await
        .map_err(|err| FeedError::Protocol(err.to_string()))?
    }
}

fn resolve(cfg: &FtpConfig) -> Result<SocketAddr, FeedError> {
    (cfg.host.as_str(), cfg.port)
        .to_socket_addrs()
        .map_err(|err| FeedError::Unreachable(format!("{}:{}: {err}", cfg.host, cfg.port)))?
        .next()
        .ok_or_else(|| {
            FeedError::Unreachable(format!("{}:{} did not resolve", cfg.host, cfg.port))
        })
}

// --- plain FTP / explicit FTPS ---

fn ftp_connect(cfg: &FtpConfig) -> Result<NativeTlsFtpStream, FeedError> {
    let addr = resolve(cfg)?;
    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
    let mut stream =
        NativeTlsFtpStream::connect_timeout(addr, timeout).map_err(map_ftp_err)?;
    if cfg.secure {
        let connector = TlsConnector::new()
            .map_err(|err| FeedError::Protocol(format!("TLS setup failed: {err}")))?;
        stream = stream
            .into_secure(NativeTlsConnector::from(connector), &cfg.host)
            .map_err(map_ftp_err)?;
    }
    stream
        .login(&cfg.username, &cfg.password)
        .map_err(map_ftp_err)?;
    stream.transfer_type(FileType::Binary).map_err(map_ftp_err)?;
    if !cfg.remote_path.is_empty() {
        stream.cwd(&cfg.remote_path).map_err(map_ftp_err)?;
    }
    Ok(stream)
}

fn ftp_list(cfg: &FtpConfig, pattern: &FilePattern) -> Result<Vec<Artifact>, FeedError> {
    let mut stream = ftp_connect(cfg)?;
    let names = stream.nlst(None).map_err(map_ftp_err)?;

    let mut artifacts = Vec::new();
    for name in names {
        if !pattern.matches(&name) {
            continue;
        }
        // SIZE is an extension; a refusal just means no size on the artifact.
        let size = stream.size(&name).ok().map(|s| s as u64);
        artifacts.push(Artifact {
            name,
            size,
            modified_at: None,
        });
    }
    let _ = stream.quit();
    Ok(artifacts)
}

fn ftp_download(cfg: &FtpConfig, name: &str, dest: &Path) -> Result<ScratchFile, FeedError> {
    let mut stream = ftp_connect(cfg)?;
    let scratch = ScratchFile::new(dest.to_path_buf());

    let mut remote = stream.retr_as_stream(name).map_err(map_ftp_err)?;
    let mut file = fs::File::create(dest)?;
    io::copy(&mut remote, &mut file)?;
    stream.finalize_retr_stream(remote).map_err(map_ftp_err)?;
    let _ = stream.quit();

    tracing::debug!(name, size = ?scratch.size(), "downloaded feed file");
    Ok(scratch)
}

fn map_ftp_err(err: suppaftp::FtpError) -> FeedError {
    use suppaftp::FtpError;
    let message = err.to_string();
    match &err {
        FtpError::ConnectionError(_) => FeedError::Unreachable(message),
        FtpError::UnexpectedResponse(response) => match response.status.clone() as u32 {
            331 | 332 | 421 | 430 | 530 | 532 => FeedError::Auth(message),
            450 | 550 | 553 => FeedError::NotFound(message),
            _ => FeedError::Protocol(message),
        },
        _ => FeedError::Protocol(message),
    }
}

// --- SFTP ---

fn sftp_session(cfg: &FtpConfig) -> Result<(ssh2::Session, ssh2::Sftp), FeedError> {
    let addr = resolve(cfg)?;
    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|err| FeedError::Unreachable(err.to_string()))?;
    let _ = tcp.set_read_timeout(Some(timeout));
    let _ = tcp.set_write_timeout(Some(timeout));

    let mut session =
        ssh2::Session::new().map_err(|err| FeedError::Protocol(err.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|err| FeedError::Unreachable(format!("SSH handshake failed: {err}")))?;
    session
        .userauth_password(&cfg.username, &cfg.password)
        .map_err(|err| FeedError::Auth(err.to_string()))?;
    let sftp = session
        .sftp()
        .map_err(|err| FeedError::Protocol(err.to_string()))?;
    Ok((session, sftp))
}

fn sftp_base(cfg: &FtpConfig) -> PathBuf {
    if cfg.remote_path.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(&cfg.remote_path)
    }
}

fn sftp_list(cfg: &FtpConfig, pattern: &FilePattern) -> Result<Vec<Artifact>, FeedError> {
    let (_session, sftp) = sftp_session(cfg)?;
    let entries = sftp
        .readdir(&sftp_base(cfg))
        .map_err(|err| FeedError::NotFound(format!("{}: {err}", cfg.remote_path)))?;

    let mut artifacts = Vec::new();
    for (path, stat) in entries {
        if stat.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !pattern.matches(name) {
            continue;
        }
        artifacts.push(Artifact {
            name: name.to_string(),
            size: stat.size,
            modified_at: stat
                .mtime
                .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0)),
        });
    }
    Ok(artifacts)
}

fn sftp_download(cfg: &FtpConfig, name: &str, dest: &Path) -> Result<ScratchFile, FeedError> {
    let (_session, sftp) = sftp_session(cfg)?;
    let remote_path = sftp_base(cfg).join(name);
    let scratch = ScratchFile::new(dest.to_path_buf());

    let mut remote = sftp
        .open(&remote_path)
        .map_err(|err| FeedError::NotFound(format!("{}: {err}", remote_path.display())))?;
    let mut file = fs::File::create(dest)?;
    io::copy(&mut remote, &mut file)?;

    tracing::debug!(name, size = ?scratch.size(), "downloaded feed file over SFTP");
    Ok(scratch)
}
