//! C6 — admin control socket: a compact message-code protocol over a filesystem
//! stream socket, dispatched through a static table instead of the original's
//! reflective handler scanning (spec.md §9 "Dynamic handler registry").

use abyss_task::{ShutdownSignal, Task};
use base64::Engine as _;
use camino::{Utf8Path, Utf8PathBuf};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::authz::Permission;
use crate::identity::{User, ROOT_UUID};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct Request {
    head: u16,
    params: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Response {
    head: u16,
    params: Vec<String>,
}

impl Response {
    fn ok(params: Vec<String>) -> Self {
        Self { head: 200, params }
    }

    fn bad_request() -> Self {
        Self { head: 400, params: Vec::new() }
    }
}

/// Head codes this socket understands; anything else is `400`.
#[repr(u16)]
enum AdminHead {
    Hello = 100,
    Init = 103,
    UserAdd = 104,
    Include = 105,
    Chmod = 106,
    List = 107,
}

impl AdminHead {
    fn from_code(code: u16) -> Option<Self> {
        match code {
            100 => Some(Self::Hello),
            103 => Some(Self::Init),
            104 => Some(Self::UserAdd),
            105 => Some(Self::Include),
            106 => Some(Self::Chmod),
            107 => Some(Self::List),
            _ => None,
        }
    }
}

pub struct AdminListener {
    listener: UnixListener,
    state: AppState,
}

impl AdminListener {
    pub async fn bind(socket_path: &Utf8Path, state: AppState) -> anyhow::Result<Self> {
        if socket_path.exists() {
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(socket_path.as_std_path())?;
        info!(path = %socket_path, "Admin control socket listening");

        Ok(Self { listener, state })
    }
}

#[async_trait::async_trait]
impl Task for AdminListener {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "admin_listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let Self { listener, state } = self;

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = shutdown_signal.wait() => return Ok(()),
            };

            let (stream, _addr) = accepted?;
            let state = state.clone();

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, &state).await {
                    warn!(error = %err, "Admin connection ended with an error");
                }
            });
        }
    }
}

async fn handle_connection(stream: UnixStream, state: &AppState) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    let response = dispatch(line.trim_end(), state).await;
    let encoded = encode(&response);
    write_half.write_all(encoded.as_bytes()).await?;
    write_half.write_all(b"\n").await?;

    Ok(())
}

async fn dispatch(line: &str, state: &AppState) -> Response {
    let Ok(request) = decode(line) else {
        return Response::bad_request();
    };

    let Some(head) = AdminHead::from_code(request.head) else {
        return Response::bad_request();
    };

    let outcome = match head {
        AdminHead::Hello => Ok(Response::ok(vec!["abyss-gateway".to_owned()])),
        AdminHead::Init => handle_init(&request.params, state).await,
        AdminHead::UserAdd => handle_useradd(&request.params, state).await,
        AdminHead::Include => handle_include(&request.params, state).await,
        AdminHead::Chmod => handle_chmod(&request.params, state).await,
        AdminHead::List => handle_list(&request.params, state).await,
    };

    outcome.unwrap_or_else(|_| Response::bad_request())
}

fn decode(line: &str) -> anyhow::Result<Request> {
    let json = base64::engine::general_purpose::STANDARD.decode(line)?;
    Ok(serde_json::from_slice(&json)?)
}

fn encode(response: &Response) -> String {
    let json = serde_json::to_vec(response).expect("Response always serializes");
    base64::engine::general_purpose::STANDARD.encode(json)
}

/// Root-level admin identity used to call through C3/C4; the socket itself is the
/// trust boundary (filesystem permissions gate who can connect at all).
fn admin_identity() -> User {
    User { uuid: ROOT_UUID, username: "root".to_owned(), parent_id: 0, public_key: [0u8; 32], privilege: i64::MAX }
}

/// Bootstraps the root user on a call with no params; per spec.md §4.2 ("the
/// bootstrap path creates `root` after a human-in-the-loop confirmation"), a first
/// call when the store is empty does not create anything — it mints a one-time
/// confirmation token (held in [`AppState::pending_init`]) and returns it with head
/// `202`. The operator re-issues Init with that token as its only param to actually
/// create `root` and the reserved subtrees. Once a root user exists, Init is a
/// no-op that just re-applies the idempotent reserved-subtree bootstrap.
async fn handle_init(params: &[String], state: &AppState) -> anyhow::Result<Response> {
    if !state.users.is_empty().await? {
        for reserved in ["Tasks", "Live"] {
            state.attributes.bootstrap_reserved(Utf8Path::new(reserved), ROOT_UUID, Permission::parse("rw,r-,r-")?).await?;
        }
        return Ok(Response::ok(Vec::new()));
    }

    let Some(confirmation) = params.first() else {
        let token = random_confirmation_token();
        *state.pending_init.lock() = Some(token.clone());
        return Ok(Response { head: 202, params: vec![token] });
    };

    let expected = state.pending_init.lock().take();
    if expected.as_deref() != Some(confirmation.as_str()) {
        return Ok(Response::bad_request());
    }

    let root_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let root = User {
        uuid: ROOT_UUID,
        username: "root".to_owned(),
        parent_id: 0,
        public_key: root_key.verifying_key().to_bytes(),
        privilege: i64::MAX,
    };

    state.users.insert(&root).await?;

    for reserved in ["Tasks", "Live"] {
        state.attributes.bootstrap_reserved(Utf8Path::new(reserved), ROOT_UUID, Permission::parse("rw,r-,r-")?).await?;
    }

    let key_b64 = base64::engine::general_purpose::STANDARD.encode(root_key.to_bytes());
    Ok(Response::ok(vec![key_b64]))
}

fn random_confirmation_token() -> String {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

async fn handle_useradd(params: &[String], state: &AppState) -> anyhow::Result<Response> {
    let [username, privilege] = params else {
        return Ok(Response::bad_request());
    };
    let privilege: i64 = privilege.parse()?;

    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let uuid = state.users.next_uuid().await?;

    state
        .users
        .insert(&User {
            uuid,
            username: username.clone(),
            parent_id: ROOT_UUID,
            public_key: signing_key.verifying_key().to_bytes(),
            privilege,
        })
        .await?;

    let key_b64 = base64::engine::general_purpose::STANDARD.encode(signing_key.to_bytes());
    Ok(Response::ok(vec![key_b64]))
}

async fn handle_include(params: &[String], state: &AppState) -> anyhow::Result<Response> {
    let [path, owner, recursive] = params else {
        return Ok(Response::bad_request());
    };
    let owner: i64 = owner.parse()?;
    let recursive: bool = recursive.parse().unwrap_or(false);

    let inserted = state
        .attributes
        .include(Utf8PathBuf::from(path).as_path(), &admin_identity(), owner, Permission::parse("rw,--,--")?, recursive)
        .await?;

    Ok(Response::ok(vec![inserted.to_string()]))
}

async fn handle_chmod(params: &[String], state: &AppState) -> anyhow::Result<Response> {
    let [path, permission, recursive] = params else {
        return Ok(Response::bad_request());
    };
    let permission = Permission::parse(permission)?;
    let recursive: bool = recursive.parse().unwrap_or(false);

    let updated = state.attributes.chmod(Utf8PathBuf::from(path).as_path(), &admin_identity(), permission, recursive).await?;

    Ok(Response::ok(vec![updated.to_string()]))
}

async fn handle_list(params: &[String], state: &AppState) -> anyhow::Result<Response> {
    let [path] = params else {
        return Ok(Response::bad_request());
    };

    let children = state.attributes.query_children(Utf8PathBuf::from(path).as_path(), &admin_identity()).await?;
    Ok(Response::ok(children))
}
