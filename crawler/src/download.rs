use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{Stream, TryStreamExt};
use futures::TryFutureExt;
use reqwest::Client;
use tokio::{fs, io};
use url::Url;

use crate::{sanitize, Error};

/// Write buffer size, responses are flushed to disk in chunks of this size.
const CHUNK_SIZE: usize = 8 * 1_024;
const PDF_EXT: &str = "pdf";
const TEMP_EXT: &str = "part";
const UNTITLED: &str = "untitled";

/// Streams remote PDF files into an output directory.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    path: PathBuf,
}

impl Downloader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::default(),
            path: path.into(),
        }
    }

    #[inline]
    pub fn with_client(self, client: Client) -> Self {
        Self { client, ..self }
    }

    /// The output directory.
    #[inline]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Return the file a document named `name` is saved to.
    ///
    /// Names sanitizing to nothing are saved as `untitled.pdf`.
    ///
    /// ```
    /// # use std::path::Path;
    /// # use crawler::download::Downloader;
    /// let downloader = Downloader::new("pdfs");
    ///
    /// assert_eq!(downloader.target_path("Deep Learning: A Survey!!"), Path::new("pdfs/Deep_Learning_A_Survey.pdf"));
    /// ```
    pub fn target_path(&self, name: &str) -> PathBuf {
        let name = sanitize(name);
        let mut path = self.path.join(if name.is_empty() { UNTITLED } else { &name });
        path.set_extension(PDF_EXT);
        path
    }

    /// Download `url` into the output directory as `name`.
    ///
    /// The output directory is created when missing. The body is first written to a staging file of its own which is
    /// renamed once complete, and removed on any failure so that only complete documents ever bear the final name.
    /// Concurrent downloads of the same name never share a staging file, the last one to complete wins.
    pub async fn download(&self, url: Url, name: &str) -> Result<PathBuf, Error> {
        fs::create_dir_all(&self.path).await?;

        let path = self.target_path(name);
        let tmp = staging_path(&path);

        tracing::debug!("Downloading `{url}` to `{}`", tmp.display());

        let result = async {
            Self::write(self.stream(url), &tmp).await?;
            fs::rename(&tmp, &path).await?;

            Ok::<_, Error>(())
        }
        .await;

        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Cannot remove partial download `{}`: {cleanup}", tmp.display());
                }
            }

            return Err(err);
        }

        tracing::info!("Saved PDF: `{}`", path.display());

        Ok(path)
    }

    async fn write(stream: impl Stream<Item = Result<bytes::Bytes, Error>>, path: &Path) -> Result<(), Error> {
        use io::AsyncWriteExt;

        futures::pin_mut!(stream);

        // a failed request must not leave an empty file behind
        let Some(first) = stream.try_next().await? else {
            fs::OpenOptions::new().write(true).create_new(true).open(path).await?;
            return Ok(());
        };

        let file = fs::OpenOptions::new().write(true).create_new(true).open(path).await?;
        let mut writer = io::BufWriter::with_capacity(CHUNK_SIZE, file);

        writer.write_all(&first).await?;

        while let Some(chunk) = stream.try_next().await? {
            writer.write_all(&chunk).await?;
        }

        writer.shutdown().await?;
        writer.into_inner().sync_all().await?;

        Ok(())
    }

    fn stream(&self, url: Url) -> impl Stream<Item = Result<bytes::Bytes, Error>> {
        self.client
            .get(url)
            .send()
            .and_then(|resp| futures::future::ready(resp.error_for_status()))
            .map_ok(|resp| resp.bytes_stream())
            .try_flatten_stream()
            .err_into()
    }
}

/// Return a staging file next to `path`, distinct for every call and every process.
fn staging_path(path: &Path) -> PathBuf {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("{PDF_EXT}.{}-{id}.{TEMP_EXT}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::Config;

    async fn serve(route: &str, response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;

        Mock::given(method("GET")).and(path(route)).respond_with(response).mount(&server).await;

        server
    }

    fn url(server: &MockServer, route: &str) -> Url {
        Url::parse(&format!("{}{route}", server.uri())).unwrap()
    }

    /// Accept a single request on a local port and let `respond` write the raw response.
    async fn raw_server<F, Fut>(respond: F) -> Url
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;

            let mut request = Vec::<u8>::new();
            let mut buf = [0; 1_024];
            while !request.ends_with(b"\r\n\r\n") {
                match socket.read(&mut buf).await? {
                    0 => break,
                    len => request.extend_from_slice(&buf[..len]),
                }
            }

            respond(socket).await
        });

        Url::parse(&format!("http://{addr}/file-Paper.pdf")).unwrap()
    }

    fn headers(len: usize) -> String {
        format!("HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n")
    }

    fn staging_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == TEMP_EXT))
            .collect()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_download_creates_directory_and_file() {
        let body = vec![0x25; 3 * CHUNK_SIZE + 17];
        let server = serve("/file-Paper.pdf", ResponseTemplate::new(200).set_body_bytes(body.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = Downloader::new(dir.path().join("nested/output"));
        let saved = downloader.download(url(&server, "/file-Paper.pdf"), "A Paper: Title").await.unwrap();

        assert_eq!(saved, dir.path().join("nested/output/A_Paper_Title.pdf"));
        assert_eq!(std::fs::read(&saved).unwrap(), body);
        assert!(staging_files(saved.parent().unwrap()).is_empty());
        assert!(logs_contain("Saved PDF"));
    }

    #[tokio::test]
    async fn test_download_directory_creation_is_idempotent() {
        let server = serve("/a.pdf", ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec())).await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = Downloader::new(dir.path());
        downloader.download(url(&server, "/a.pdf"), "first").await.unwrap();
        downloader.download(url(&server, "/a.pdf"), "second").await.unwrap();

        assert!(dir.path().join("first.pdf").is_file());
        assert!(dir.path().join("second.pdf").is_file());
    }

    #[test]
    fn test_target_path() {
        let downloader = Downloader::new("out");

        assert_eq!(downloader.target_path("Title: with/slashes"), Path::new("out/Title_with_slashes.pdf"));
        assert_eq!(downloader.target_path("???"), Path::new("out/untitled.pdf"));

        let long = downloader.target_path(&"n".repeat(500));
        assert_eq!(long.file_stem().unwrap().len(), crate::sanitize::MAX_NAME_LEN);
    }

    #[tokio::test]
    async fn test_download_error_status_leaves_nothing() {
        let server = serve("/missing.pdf", ResponseTemplate::new(404)).await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = Downloader::new(dir.path());
        let result = downloader.download(url(&server, "/missing.pdf"), "missing").await;

        assert!(matches!(result, Err(Error::Reqwest(_))), "unexpected result: {result:?}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_write_error_is_surfaced() {
        let server = serve("/a.pdf", ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec())).await;
        let dir = tempfile::tempdir().unwrap();

        // the output "directory" is a regular file
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let downloader = Downloader::new(&blocker);
        let result = downloader.download(url(&server, "/a.pdf"), "a").await;

        assert!(matches!(result, Err(Error::Io(_))), "unexpected result: {result:?}");
    }

    #[test]
    fn test_staging_paths_are_distinct() {
        let path = Path::new("out/Same_Title.pdf");

        let first = staging_path(path);
        let second = staging_path(path);

        assert_ne!(first, second);
        assert_eq!(first.parent(), path.parent());
        assert!(first.file_name().unwrap().to_str().unwrap().starts_with("Same_Title.pdf."));
        assert_eq!(first.extension().unwrap(), TEMP_EXT);
    }

    #[tokio::test]
    async fn test_slow_body_outlasting_timeout_is_saved() {
        let body = b"%PDF-1.4 sent slowly".to_vec();
        let url = raw_server({
            let body = body.clone();
            move |mut socket| async move {
                socket.write_all(headers(body.len()).as_bytes()).await?;

                // one byte every 100 ms, twice as long as the timeout overall
                for byte in body {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    socket.write_all(&[byte]).await?;
                }

                Ok(())
            }
        })
        .await;
        let dir = tempfile::tempdir().unwrap();

        let client = Config::default().with_timeout(Duration::from_secs(1)).client().unwrap();
        let downloader = Downloader::new(dir.path()).with_client(client);
        let saved = downloader.download(url, "slow").await.unwrap();

        assert_eq!(std::fs::read(saved).unwrap(), body);
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let url = raw_server(|mut socket| async move {
            socket.write_all(headers(64).as_bytes()).await?;
            socket.write_all(b"%PDF-1.4").await?;
            tokio::time::sleep(Duration::from_secs(5)).await;

            Ok(())
        })
        .await;
        let dir = tempfile::tempdir().unwrap();

        let client = Config::default().with_timeout(Duration::from_millis(500)).client().unwrap();
        let downloader = Downloader::new(dir.path()).with_client(client);
        let result = downloader.download(url, "stalled").await;

        assert!(matches!(result, Err(Error::Reqwest(_))), "unexpected result: {result:?}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_downloads_of_same_name_stay_whole() {
        let large = vec![0x41; 200_000];
        let (paused_tx, paused_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel::<()>();

        let slow = raw_server({
            let large = large.clone();
            move |mut socket| async move {
                socket.write_all(headers(large.len()).as_bytes()).await?;
                socket.write_all(&large[..100_000]).await?;

                let _ = paused_tx.send(());
                let _ = resume_rx.await;

                socket.write_all(&large[100_000..]).await?;

                Ok(())
            }
        })
        .await;
        let server = serve("/small.pdf", ResponseTemplate::new(200).set_body_bytes(b"%PDF small".to_vec())).await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = Downloader::new(dir.path());
        let first = tokio::spawn({
            let downloader = downloader.clone();
            async move { downloader.download(slow, "Same Title").await }
        });

        paused_rx.await.unwrap();

        let second = downloader.download(url(&server, "/small.pdf"), "Same Title").await.unwrap();
        assert_eq!(std::fs::read(&second).unwrap(), b"%PDF small");

        resume_tx.send(()).unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), large);
        assert!(staging_files(dir.path()).is_empty());
    }
}
