#![forbid(unsafe_code)]

//! Thin client for the Helix REST API plus the `CatalogService` seam the
//! rest of the crate talks to. Only the three queries the archiver needs are
//! implemented: users by login, users by id, and one page of videos.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::{IdentitySelector, Settings};
use crate::metadata::{UserIdentity, VideoRecord};

const USER_AGENT: &str = concat!("vod-archiver/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for a single page of the videos listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoQuery {
    pub user_id: String,
    pub first: u32,
    /// Cursor from the previous page; empty on the first request.
    pub after: String,
    pub video_type: Option<String>,
}

impl VideoQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("user_id", self.user_id.clone()),
            ("first", self.first.to_string()),
        ];
        if !self.after.is_empty() {
            pairs.push(("after", self.after.clone()));
        }
        if let Some(kind) = &self.video_type {
            pairs.push(("type", kind.clone()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoPage {
    pub videos: Vec<VideoRecord>,
    /// Empty when the service reports no further pages.
    pub cursor: String,
}

/// Paginated query service the catalog fetcher and identity lookup run
/// against. `HelixClient` is the production implementation.
pub trait CatalogService: Send + Sync {
    fn users_by_login(&self, login: &str) -> Result<Vec<UserIdentity>>;
    fn users_by_id(&self, id: &str) -> Result<Vec<UserIdentity>>;
    fn videos_page(&self, query: &VideoQuery) -> Result<VideoPage>;
}

#[derive(Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Deserialize, Default)]
struct Pagination {
    #[serde(default)]
    cursor: Option<String>,
}

pub struct HelixClient {
    agent: ureq::Agent,
    base_url: String,
    client_id: String,
    access_token: Option<String>,
}

impl HelixClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            access_token,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.api_base.clone(),
            settings.client_id.clone(),
            settings.access_token.clone(),
        )
    }

    fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<DataResponse<T>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.agent.get(&url).set("Client-Id", &self.client_id);
        if let Some(token) = &self.access_token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => response
                .into_json::<DataResponse<T>>()
                .with_context(|| format!("decoding {endpoint} response")),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                bail!("{endpoint} request failed with status {code}: {}", body.trim())
            }
            Err(err) => Err(anyhow!(err)).with_context(|| format!("requesting {url}")),
        }
    }
}

impl CatalogService for HelixClient {
    fn users_by_login(&self, login: &str) -> Result<Vec<UserIdentity>> {
        Ok(self
            .get::<UserIdentity>("users", &[("login", login.to_string())])?
            .data)
    }

    fn users_by_id(&self, id: &str) -> Result<Vec<UserIdentity>> {
        Ok(self.get::<UserIdentity>("users", &[("id", id.to_string())])?.data)
    }

    fn videos_page(&self, query: &VideoQuery) -> Result<VideoPage> {
        let response = self.get::<VideoRecord>("videos", &query.pairs())?;
        Ok(VideoPage {
            videos: response.data,
            cursor: response.pagination.cursor.unwrap_or_default(),
        })
    }
}

/// Turns a login or id into the canonical identity. Exactly one lookup is
/// made, whichever the selector names.
pub fn resolve_identity<S>(service: &S, selector: &IdentitySelector) -> Result<UserIdentity>
where
    S: CatalogService + ?Sized,
{
    let (users, label) = match selector {
        IdentitySelector::Login(login) => (
            service
                .users_by_login(login)
                .with_context(|| format!("looking up user {login}"))?,
            login,
        ),
        IdentitySelector::Id(id) => (
            service
                .users_by_id(id)
                .with_context(|| format!("looking up user id {id}"))?,
            id,
        ),
    };
    users
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("user {label} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves exactly one canned HTTP response and hands back the raw request
    /// head it received.
    fn serve_once(status: &str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();
            head
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn videos_page_sends_headers_and_query() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"data":[{"id":"1","user_id":"7","created_at":"2018-03-02T20:53:41Z","url":"https://www.twitch.tv/videos/1","title":"one"}],"pagination":{"cursor":"abc"}}"#,
        );
        let client = HelixClient::new(base, "client-123", Some("tok".into()));
        let page = client
            .videos_page(&VideoQuery {
                user_id: "7".into(),
                first: 100,
                after: "prev".into(),
                video_type: Some("archive".into()),
            })
            .unwrap();
        let head = server.join().unwrap();

        assert_eq!(page.cursor, "abc");
        assert_eq!(page.videos.len(), 1);
        assert_eq!(page.videos[0].title(), "one");
        let request_line = head.lines().next().unwrap();
        assert!(request_line.starts_with("GET /videos?"));
        assert!(request_line.contains("user_id=7"));
        assert!(request_line.contains("first=100"));
        assert!(request_line.contains("after=prev"));
        assert!(request_line.contains("type=archive"));
        let lower = head.to_ascii_lowercase();
        assert!(lower.contains("client-id: client-123"));
        assert!(lower.contains("authorization: bearer tok"));
    }

    #[test]
    fn videos_page_without_cursor_is_last_page() {
        let (base, server) = serve_once("200 OK", r#"{"data":[],"pagination":{}}"#);
        let client = HelixClient::new(base, "client-123", None);
        let page = client
            .videos_page(&VideoQuery {
                user_id: "7".into(),
                first: 100,
                after: String::new(),
                video_type: None,
            })
            .unwrap();
        let head = server.join().unwrap();

        assert_eq!(page, VideoPage::default());
        assert!(!head.contains("after="));
        assert!(!head.to_ascii_lowercase().contains("authorization:"));
    }

    #[test]
    fn status_errors_carry_body() {
        let (base, server) = serve_once(
            "401 Unauthorized",
            r#"{"error":"Unauthorized","status":401,"message":"OAuth token is missing"}"#,
        );
        let client = HelixClient::new(base, "client-123", None);
        let err = client.users_by_login("twitchdev").unwrap_err();
        server.join().unwrap();
        let message = err.to_string();
        assert!(message.contains("401"));
        assert!(message.contains("OAuth token is missing"));
    }

    #[test]
    fn users_by_login_decodes_identity() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"data":[{"id":"141981764","login":"twitchdev","display_name":"TwitchDev","type":""}]}"#,
        );
        let client = HelixClient::new(format!("{base}/"), "client-123", None);
        let users = client.users_by_login("twitchdev").unwrap();
        let head = server.join().unwrap();
        assert!(head.starts_with("GET /users?login=twitchdev "));
        assert_eq!(
            users,
            vec![UserIdentity {
                id: "141981764".into(),
                login: "twitchdev".into(),
                display_name: "TwitchDev".into(),
            }]
        );
    }

    #[derive(Default)]
    struct LookupService {
        calls: Mutex<Vec<String>>,
        users: Vec<UserIdentity>,
    }

    impl CatalogService for LookupService {
        fn users_by_login(&self, login: &str) -> Result<Vec<UserIdentity>> {
            self.calls.lock().push(format!("login:{login}"));
            Ok(self.users.clone())
        }

        fn users_by_id(&self, id: &str) -> Result<Vec<UserIdentity>> {
            self.calls.lock().push(format!("id:{id}"));
            Ok(self.users.clone())
        }

        fn videos_page(&self, _query: &VideoQuery) -> Result<VideoPage> {
            bail!("not used")
        }
    }

    fn dev() -> UserIdentity {
        UserIdentity {
            id: "141981764".into(),
            login: "twitchdev".into(),
            display_name: "TwitchDev".into(),
        }
    }

    #[test]
    fn resolve_identity_uses_only_the_selected_lookup() {
        let service = LookupService {
            users: vec![dev()],
            ..LookupService::default()
        };
        let user = resolve_identity(&service, &IdentitySelector::Login("twitchdev".into())).unwrap();
        assert_eq!(user, dev());
        let user = resolve_identity(&service, &IdentitySelector::Id("141981764".into())).unwrap();
        assert_eq!(user.display_name, "TwitchDev");
        assert_eq!(
            *service.calls.lock(),
            vec!["login:twitchdev".to_string(), "id:141981764".to_string()]
        );
    }

    #[test]
    fn resolve_identity_reports_unknown_user() {
        let service = LookupService::default();
        let err = resolve_identity(&service, &IdentitySelector::Login("ghost".into())).unwrap_err();
        assert!(err.to_string().contains("user ghost not found"));
    }
}
