use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::TimeZone;
use url::Url;

use gimme_aws_creds::{
    AppUrl, ApplicationLink, Assertion, AssumeRoleWithSamlRequest, Config, CredentialSink,
    CredentialStore, CredsFlow, Delivered, FlowError, IdentityProvider, IdpError, Lookup,
    NonInteractive, OutputMode, ProfilePolicy, ReauthPolicy, Session, TemporaryCredential,
    TokenService, UserCredentials,
};

const PASSWORD: &str = "correct horse";
const IDP_ARN: &str = "arn:aws:iam::123456789012:saml-provider/Okta";

#[derive(Default)]
struct IdpState {
    logins: AtomicUsize,
    assertion_tokens: Mutex<Vec<String>>,
}

#[derive(Clone)]
struct StubIdp {
    apps: Vec<ApplicationLink>,
    roles: Vec<String>,
    state: Arc<IdpState>,
}

impl StubIdp {
    fn new() -> Self {
        Self {
            apps: vec![app("AWS-Dev", "0oa1"), app("AWS-Prod", "0oa2")],
            roles: vec!["ReadOnly".to_string(), "Admin".to_string()],
            state: Arc::default(),
        }
    }

    fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    fn assertion_tokens(&self) -> Vec<String> {
        self.state.assertion_tokens.lock().unwrap().clone()
    }
}

fn app(label: &str, id: &str) -> ApplicationLink {
    ApplicationLink {
        label: label.to_string(),
        app_instance_id: id.to_string(),
        link_url: Url::parse(&format!("https://example.okta.com/home/amazon_aws/{id}/272")).unwrap(),
    }
}

#[async_trait]
impl IdentityProvider for StubIdp {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, IdpError> {
        if password != PASSWORD {
            return Err(IdpError::Authentication("Authentication failed".to_string()));
        }
        let login = self.state.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session {
            token: format!("token-{login}"),
            user_id: format!("user-{username}"),
        })
    }

    async fn list_applications(&self, _session: &Session) -> Result<Vec<ApplicationLink>, IdpError> {
        Ok(self.apps.clone())
    }

    async fn list_roles(&self, _session: &Session, _app: &AppUrl) -> Result<Vec<String>, IdpError> {
        Ok(self.roles.clone())
    }

    async fn resolve_app_url(&self, _session: &Session, app_name: &str) -> Result<AppUrl, IdpError> {
        self.apps
            .iter()
            .find(|app| app.label == app_name)
            .cloned()
            .map(Into::into)
            .ok_or(IdpError::NotFound {
                kind: Lookup::Application,
                name: app_name.to_string(),
            })
    }

    async fn resolve_idp_arn(&self, instance_id: &str) -> Result<String, IdpError> {
        if self.apps.iter().any(|app| app.app_instance_id == instance_id) {
            Ok(IDP_ARN.to_string())
        } else {
            Err(IdpError::NotFound {
                kind: Lookup::IdentityProvider,
                name: instance_id.to_string(),
            })
        }
    }

    async fn resolve_role_arn(
        &self,
        _link_url: &Url,
        _session_token: &str,
        role_name: &str,
    ) -> Result<String, IdpError> {
        self.roles
            .iter()
            .find(|role| *role == role_name)
            .map(|role| format!("arn:aws:iam::123456789012:role/{role}"))
            .ok_or(IdpError::NotFound {
                kind: Lookup::Role,
                name: role_name.to_string(),
            })
    }

    async fn fetch_assertion(
        &self,
        _link_url: &Url,
        session_token: &str,
    ) -> Result<Assertion, IdpError> {
        self.state
            .assertion_tokens
            .lock()
            .unwrap()
            .push(session_token.to_string());
        Ok(Assertion::new(format!("assertion-for-{session_token}")))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Exchange {
    role_arn: String,
    principal_arn: String,
    assertion: String,
    duration_secs: i32,
}

#[derive(Clone)]
struct StubSts {
    result: Result<TemporaryCredential, String>,
    exchanges: Arc<Mutex<Vec<Exchange>>>,
}

impl StubSts {
    fn returning(credential: TemporaryCredential) -> Self {
        Self {
            result: Ok(credential),
            exchanges: Arc::default(),
        }
    }

    fn rejecting(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            exchanges: Arc::default(),
        }
    }
}

#[async_trait]
impl TokenService for StubSts {
    async fn assume_role_with_saml(
        &self,
        request: AssumeRoleWithSamlRequest,
    ) -> Result<TemporaryCredential, String> {
        self.exchanges.lock().unwrap().push(Exchange {
            role_arn: request.role_arn,
            principal_arn: request.principal_arn,
            assertion: request.assertion.as_str().to_string(),
            duration_secs: request.duration_secs,
        });
        self.result.clone()
    }
}

fn credential(suffix: &str) -> TemporaryCredential {
    TemporaryCredential {
        access_key_id: format!("AKIA_{suffix}"),
        secret_access_key: format!("SECRET_{suffix}"),
        session_token: format!("TOKEN_{suffix}"),
        expires_at: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

fn config(output: OutputMode, cred_profile: ProfilePolicy) -> Config {
    let mut config = Config::new(Url::parse("https://example.okta.com").unwrap(), "jane");
    config.app_name = Some("AWS-Prod".to_string());
    config.role_name = Some("Admin".to_string());
    config.duration_secs = 900;
    config.output = output;
    config.cred_profile = cred_profile;
    config
}

fn flow(
    config: Config,
    password: &str,
    idp: &StubIdp,
    sts: &StubSts,
) -> CredsFlow<StubIdp, StubSts, NonInteractive> {
    let user = UserCredentials::new(config.username.clone(), password);
    CredsFlow::new(config, user, idp.clone(), sts.clone(), NonInteractive)
}

async fn run(
    config: Config,
    password: &str,
    idp: &StubIdp,
    sts: &StubSts,
    store: &CredentialStore,
    out: &mut Vec<u8>,
) -> Result<Delivered, FlowError<gimme_aws_creds::SelectionRequired>> {
    let sink = CredentialSink::for_config(&config, || Ok(store.clone()), out).unwrap();
    flow(config, password, idp, sts).run(sink).await
}

fn credentials_file(dir: &tempfile::TempDir) -> CredentialStore {
    CredentialStore::new(dir.path().join(".aws").join("credentials"))
}

#[tokio::test]
async fn role_policy_writes_role_section() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let idp = StubIdp::new();
    let sts = StubSts::returning(credential("TEST"));
    let mut out = Vec::new();

    let delivered = run(
        config(OutputMode::Persist, ProfilePolicy::Role),
        PASSWORD,
        &idp,
        &sts,
        &store,
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(
        delivered,
        Delivered::Persisted {
            path: store.path().to_path_buf(),
            profile: "Admin".to_string(),
        }
    );
    assert_eq!(
        std::fs::read_to_string(store.path()).unwrap(),
        "[Admin]\naws_access_key_id = AKIA_TEST\naws_secret_access_key = SECRET_TEST\naws_session_token = TOKEN_TEST\n"
    );
    assert!(out.is_empty());
    assert_eq!(
        *sts.exchanges.lock().unwrap(),
        vec![Exchange {
            role_arn: "arn:aws:iam::123456789012:role/Admin".to_string(),
            principal_arn: IDP_ARN.to_string(),
            assertion: "assertion-for-token-2".to_string(),
            duration_secs: 900,
        }]
    );
}

#[tokio::test]
async fn default_policy_keeps_unrelated_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(store.path(), "[default]\nregion=us-east-1\n").unwrap();
    let idp = StubIdp::new();
    let sts = StubSts::returning(credential("TEST"));

    run(
        config(OutputMode::Persist, ProfilePolicy::Default),
        PASSWORD,
        &idp,
        &sts,
        &store,
        &mut Vec::new(),
    )
    .await
    .unwrap();

    let profile = store.read_profile("default").await.unwrap().unwrap();
    assert_eq!(
        profile,
        [
            ("region", "us-east-1"),
            ("aws_access_key_id", "AKIA_TEST"),
            ("aws_secret_access_key", "SECRET_TEST"),
            ("aws_session_token", "TOKEN_TEST"),
        ]
        .map(|(key, value)| (key.to_string(), value.to_string()))
    );
}

#[tokio::test]
async fn rerun_replaces_credentials_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let idp = StubIdp::new();

    for suffix in ["FIRST", "SECOND"] {
        run(
            config(OutputMode::Persist, ProfilePolicy::Role),
            PASSWORD,
            &idp,
            &StubSts::returning(credential(suffix)),
            &store,
            &mut Vec::new(),
        )
        .await
        .unwrap();
    }

    let content = std::fs::read_to_string(store.path()).unwrap();
    assert_eq!(content.matches("[Admin]").count(), 1);
    assert!(!content.contains("FIRST"));
    assert_eq!(
        store.read_profile("Admin").await.unwrap().unwrap(),
        [
            ("aws_access_key_id", "AKIA_SECOND"),
            ("aws_secret_access_key", "SECRET_SECOND"),
            ("aws_session_token", "TOKEN_SECOND"),
        ]
        .map(|(key, value)| (key.to_string(), value.to_string()))
    );
}

#[tokio::test]
async fn other_sections_survive_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    let existing = "# long-term keys\n[personal]\naws_access_key_id = AKIA_PERSONAL\naws_secret_access_key = SECRET_PERSONAL\n\n[Admin]\nregion = eu-west-1\naws_access_key_id = AKIA_STALE\n";
    std::fs::write(store.path(), existing).unwrap();

    run(
        config(OutputMode::Persist, ProfilePolicy::Role),
        PASSWORD,
        &StubIdp::new(),
        &StubSts::returning(credential("TEST")),
        &store,
        &mut Vec::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(store.path()).unwrap(),
        "# long-term keys\n[personal]\naws_access_key_id = AKIA_PERSONAL\naws_secret_access_key = SECRET_PERSONAL\n\n[Admin]\nregion = eu-west-1\naws_access_key_id = AKIA_TEST\naws_secret_access_key = SECRET_TEST\naws_session_token = TOKEN_TEST\n"
    );
}

#[tokio::test]
async fn emit_prints_exports_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let mut out = Vec::new();

    let delivered = run(
        config(OutputMode::Emit, ProfilePolicy::Role),
        PASSWORD,
        &StubIdp::new(),
        &StubSts::returning(credential("TEST")),
        &store,
        &mut out,
    )
    .await
    .unwrap();

    assert_eq!(delivered, Delivered::Emitted);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "export AWS_ACCESS_KEY_ID=AKIA_TEST\nexport AWS_SECRET_ACCESS_KEY=SECRET_TEST\nexport AWS_SESSION_TOKEN=TOKEN_TEST\n"
    );
    assert!(!store.path().exists());
}

#[tokio::test]
async fn rejected_login_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let idp = StubIdp::new();
    let sts = StubSts::returning(credential("TEST"));
    let mut out = Vec::new();

    let error = run(
        config(OutputMode::Persist, ProfilePolicy::Role),
        "wrong",
        &idp,
        &sts,
        &store,
        &mut out,
    )
    .await
    .unwrap_err();

    assert!(matches!(error, FlowError::Authentication(ref message) if message == "Authentication failed"));
    assert_eq!(idp.logins(), 0);
    assert!(sts.exchanges.lock().unwrap().is_empty());
    assert!(!store.path().exists());
    assert!(out.is_empty());
}

#[tokio::test]
async fn unknown_application_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let sts = StubSts::returning(credential("TEST"));
    let mut config = config(OutputMode::Emit, ProfilePolicy::Role);
    config.app_name = Some("AWS-Staging".to_string());
    let mut out = Vec::new();

    let error = run(config, PASSWORD, &StubIdp::new(), &sts, &store, &mut out)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        FlowError::NotFound { kind: Lookup::Application, ref name } if name == "AWS-Staging"
    ));
    assert_eq!(error.to_string(), "application \"AWS-Staging\" not found");
    assert!(sts.exchanges.lock().unwrap().is_empty());
    assert!(out.is_empty());
}

#[tokio::test]
async fn unknown_role_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let mut config = config(OutputMode::Persist, ProfilePolicy::Role);
    config.role_name = Some("PowerUser".to_string());

    let error = run(
        config,
        PASSWORD,
        &StubIdp::new(),
        &StubSts::returning(credential("TEST")),
        &store,
        &mut Vec::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, FlowError::NotFound { kind: Lookup::Role, .. }));
    assert!(!store.path().exists());
}

#[tokio::test]
async fn token_exchange_rejection_is_reported_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let mut out = Vec::new();
    let rejection = "InvalidIdentityToken: Specified provider doesn't exist";

    let error = run(
        config(OutputMode::Persist, ProfilePolicy::Role),
        PASSWORD,
        &StubIdp::new(),
        &StubSts::rejecting(rejection),
        &store,
        &mut out,
    )
    .await
    .unwrap_err();

    assert!(matches!(error, FlowError::TokenExchange(ref message) if message == rejection));
    assert!(!store.path().exists());
    assert!(out.is_empty());
}

#[tokio::test]
async fn reauthenticate_fetches_assertion_with_fresh_token() {
    let idp = StubIdp::new();
    let sts = StubSts::returning(credential("TEST"));
    let mut config = config(OutputMode::Emit, ProfilePolicy::Role);
    config.reauth = ReauthPolicy::Reauthenticate;

    flow(config, PASSWORD, &idp, &sts).credentials().await.unwrap();

    assert_eq!(idp.logins(), 2);
    assert_eq!(idp.assertion_tokens(), ["token-2"]);
}

#[tokio::test]
async fn reuse_session_fetches_assertion_with_first_token() {
    let idp = StubIdp::new();
    let sts = StubSts::returning(credential("TEST"));
    let mut config = config(OutputMode::Emit, ProfilePolicy::Role);
    config.reauth = ReauthPolicy::ReuseSession;

    let (credential, resolved) = flow(config, PASSWORD, &idp, &sts).credentials().await.unwrap();

    assert_eq!(idp.logins(), 1);
    assert_eq!(idp.assertion_tokens(), ["token-1"]);
    assert_eq!(credential.access_key_id, "AKIA_TEST");
    assert_eq!(resolved.app_name, "AWS-Prod");
    assert_eq!(resolved.role_name, "Admin");
    assert_eq!(resolved.app_url.instance_id, "0oa2");
    assert_eq!(resolved.idp_arn, IDP_ARN);
    assert_eq!(resolved.role_arn, "arn:aws:iam::123456789012:role/Admin");
}

#[tokio::test]
async fn unset_app_and_role_are_chosen_interactively() {
    let idp = StubIdp::new();
    let sts = StubSts::returning(credential("TEST"));
    let mut config = config(OutputMode::Emit, ProfilePolicy::Role);
    config.app_name = None;
    config.role_name = None;
    let asked = Mutex::new(Vec::new());
    let chooser = |kind: Lookup, options: &[String]| {
        asked.lock().unwrap().push((kind, options.to_vec()));
        Ok::<_, Infallible>(match kind {
            Lookup::Application => 0,
            _ => 1,
        })
    };

    let user = UserCredentials::new("jane", PASSWORD);
    let (_, resolved) = CredsFlow::new(config, user, idp.clone(), sts, chooser)
        .credentials()
        .await
        .unwrap();

    assert_eq!(resolved.app_name, "AWS-Dev");
    assert_eq!(resolved.role_name, "Admin");
    assert_eq!(
        *asked.lock().unwrap(),
        vec![
            (
                Lookup::Application,
                vec!["AWS-Dev".to_string(), "AWS-Prod".to_string()]
            ),
            (
                Lookup::Role,
                vec!["ReadOnly".to_string(), "Admin".to_string()]
            ),
        ]
    );
}

#[tokio::test]
async fn unattended_run_refuses_to_choose() {
    let dir = tempfile::tempdir().unwrap();
    let store = credentials_file(&dir);
    let mut config = config(OutputMode::Persist, ProfilePolicy::Role);
    config.role_name = None;

    let error = run(
        config,
        PASSWORD,
        &StubIdp::new(),
        &StubSts::returning(credential("TEST")),
        &store,
        &mut Vec::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, FlowError::Selection(_)));
    assert!(!store.path().exists());
}
