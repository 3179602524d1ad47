//! An [`IdentityProvider`] backed by the Okta API.

use std::{collections::HashMap, fmt, sync::Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Response, StatusCode};
use url::Url;

use crate::{
    idp::{AppUrl, ApplicationLink, Assertion, IdentityProvider, IdpError, Lookup, Session},
    CLIENT_NAME,
};

const AWS_APP_NAME: &str = "amazon_aws";
const ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";

/// Okta client for the primary authentication, app link, and SAML endpoints.
///
/// Okta session tokens can only be exchanged once, so the assertion page fetched for a session
/// token is remembered for the lifetime of the client. Listing roles, resolving a role ARN, and
/// fetching the assertion with the same token all read the same page.
pub struct OktaClient {
    http: reqwest::Client,
    api_base: Url,
    api_key: String,
    assertions: Mutex<HashMap<(Url, String), Assertion>>,
}

impl OktaClient {
    /// Construct a client for the Okta organization at `org_url`.
    ///
    /// `api_key` is used for the endpoints that require an API token (app links and app
    /// settings).
    ///
    /// # Errors
    ///
    /// Returns an error if `org_url` cannot be a base URL or the HTTP client cannot be built.
    pub fn new(org_url: &Url, api_key: impl Into<String>) -> Result<Self, String> {
        let mut base = org_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let api_base = base
            .join("api/v1/")
            .map_err(|error| format!("invalid Okta URL {org_url}: {error}"))?;
        if api_base.cannot_be_a_base() {
            return Err(format!("invalid Okta URL {org_url}: cannot be a base URL"));
        }

        let http = reqwest::Client::builder()
            .user_agent(CLIENT_NAME)
            .build()
            .map_err(|error| format!("unable to build HTTP client: {error}"))?;

        Ok(Self {
            http,
            api_base,
            api_key: api_key.into(),
            assertions: Mutex::default(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IdpError> {
        self.api_base
            .join(path)
            .map_err(|error| IdpError::Api(format!("invalid endpoint {path}: {error}")))
    }

    async fn get_api(&self, url: Url) -> Result<Response, IdpError> {
        self.http
            .get(url)
            .header(header::AUTHORIZATION, format!("SSWS {}", self.api_key))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| IdpError::Api(error.to_string()))
    }

    async fn saml_response(
        &self,
        link_url: &Url,
        session_token: &str,
    ) -> Result<Assertion, IdpError> {
        let key = (link_url.clone(), session_token.to_string());
        let memoized = self.memo().get(&key).cloned();
        if let Some(assertion) = memoized {
            return Ok(assertion);
        }

        let res = self
            .http
            .get(link_url.clone())
            .query(&[("sessionToken", session_token)])
            .send()
            .await
            .map_err(|error| IdpError::AssertionRetrieval(error.to_string()))?;
        if !res.status().is_success() {
            return Err(IdpError::AssertionRetrieval(format!(
                "{link_url} responded with {}",
                res.status()
            )));
        }
        let page = res
            .text()
            .await
            .map_err(|error| IdpError::AssertionRetrieval(error.to_string()))?;

        let assertion = parse_saml_response(&page).map(Assertion::new).ok_or_else(|| {
            IdpError::AssertionRetrieval(format!(
                "no SAMLResponse in page from {link_url}; the session token may be expired"
            ))
        })?;
        self.memo().insert(key, assertion.clone());
        Ok(assertion)
    }

    fn memo(&self) -> std::sync::MutexGuard<'_, HashMap<(Url, String), Assertion>> {
        // the map is only ever inserted into, so a poisoned lock still holds valid entries
        self.assertions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for OktaClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OktaClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityProvider for OktaClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, IdpError> {
        let res = self
            .http
            .post(self.endpoint("authn")?)
            .header(header::ACCEPT, "application/json")
            .json(&AuthnRequest { username, password })
            .send()
            .await
            .map_err(|error| IdpError::Api(error.to_string()))?;

        if matches!(res.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(IdpError::Authentication(error_summary(res).await));
        }
        let res: AuthnResponse = check(res)
            .await?
            .json()
            .await
            .map_err(|error| IdpError::Api(format!("invalid authn response: {error}")))?;

        match res {
            AuthnResponse {
                status,
                session_token: Some(token),
                embedded: Some(embedded),
            } if status == "SUCCESS" => Ok(Session {
                token,
                user_id: embedded.user.id,
            }),
            AuthnResponse { status, .. } if status == "SUCCESS" => Err(IdpError::Api(
                "invalid authn response: missing sessionToken or user".to_string(),
            )),
            AuthnResponse { status, .. } => Err(IdpError::Authentication(format!(
                "unsupported authentication status {status}"
            ))),
        }
    }

    async fn list_applications(&self, session: &Session) -> Result<Vec<ApplicationLink>, IdpError> {
        let url = self.endpoint(&format!("users/{}/appLinks", session.user_id))?;
        let links: Vec<AppLinkResponse> = check(self.get_api(url).await?)
            .await?
            .json()
            .await
            .map_err(|error| IdpError::Api(format!("invalid appLinks response: {error}")))?;

        Ok(links
            .into_iter()
            .filter(|link| link.app_name == AWS_APP_NAME)
            .map(|link| ApplicationLink {
                label: link.label,
                app_instance_id: link.app_instance_id,
                link_url: link.link_url,
            })
            .collect())
    }

    async fn list_roles(&self, session: &Session, app: &AppUrl) -> Result<Vec<String>, IdpError> {
        let assertion = self.saml_response(&app.link_url, &session.token).await?;
        Ok(aws_roles(&assertion)?
            .into_iter()
            .map(|role| role.name().to_string())
            .collect())
    }

    async fn resolve_app_url(&self, session: &Session, app_name: &str) -> Result<AppUrl, IdpError> {
        self.list_applications(session)
            .await?
            .into_iter()
            .find(|link| link.label == app_name)
            .map(Into::into)
            .ok_or_else(|| IdpError::not_found(Lookup::Application, app_name))
    }

    async fn resolve_idp_arn(&self, instance_id: &str) -> Result<String, IdpError> {
        let res = self.get_api(self.endpoint(&format!("apps/{instance_id}"))?).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(IdpError::not_found(Lookup::IdentityProvider, instance_id));
        }
        let app: serde_json::Value = check(res)
            .await?
            .json()
            .await
            .map_err(|error| IdpError::Api(format!("invalid app response: {error}")))?;

        app.pointer("/settings/app/identityProviderArn")
            .and_then(serde_json::Value::as_str)
            .filter(|arn| !arn.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| IdpError::not_found(Lookup::IdentityProvider, instance_id))
    }

    async fn resolve_role_arn(
        &self,
        link_url: &Url,
        session_token: &str,
        role_name: &str,
    ) -> Result<String, IdpError> {
        let assertion = self.saml_response(link_url, session_token).await?;
        aws_roles(&assertion)?
            .into_iter()
            .find(|role| role.name() == role_name)
            .map(|role| {
                tracing::debug!(principal_arn = %role.principal_arn, "role found in assertion");
                role.role_arn
            })
            .ok_or_else(|| IdpError::not_found(Lookup::Role, role_name))
    }

    async fn fetch_assertion(
        &self,
        link_url: &Url,
        session_token: &str,
    ) -> Result<Assertion, IdpError> {
        self.saml_response(link_url, session_token).await
    }
}

#[derive(serde::Serialize)]
struct AuthnRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthnResponse {
    status: String,
    session_token: Option<String>,
    #[serde(rename = "_embedded")]
    embedded: Option<AuthnEmbedded>,
}

#[derive(serde::Deserialize)]
struct AuthnEmbedded {
    user: AuthnUser,
}

#[derive(serde::Deserialize)]
struct AuthnUser {
    id: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppLinkResponse {
    label: String,
    link_url: Url,
    app_name: String,
    app_instance_id: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_summary: String,
}

async fn error_summary(res: Response) -> String {
    let status = res.status();
    match res.json::<ErrorResponse>().await {
        Ok(body) => body.error_summary,
        Err(_) => status.to_string(),
    }
}

async fn check(res: Response) -> Result<Response, IdpError> {
    if res.status().is_success() {
        Ok(res)
    } else {
        let url = res.url().clone();
        let summary = error_summary(res).await;
        Err(IdpError::Api(format!("{url} failed: {summary}")))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct AwsRole {
    role_arn: String,
    principal_arn: String,
}

impl AwsRole {
    fn name(&self) -> &str {
        self.role_arn
            .rsplit_once('/')
            .map_or(self.role_arn.as_str(), |(_, name)| name)
    }
}

/// Read the AWS role attribute from a SAML assertion.
///
/// Each value is a `provider-arn,role-arn` pair, in either order.
fn aws_roles(assertion: &Assertion) -> Result<Vec<AwsRole>, IdpError> {
    let invalid = |error: String| {
        IdpError::AssertionRetrieval(format!("invalid SAML assertion: {error}"))
    };
    let xml = STANDARD
        .decode(assertion.as_str())
        .map_err(|error| invalid(error.to_string()))
        .and_then(|xml| String::from_utf8(xml).map_err(|error| invalid(error.to_string())))?;
    let doc = roxmltree::Document::parse(&xml).map_err(|error| invalid(error.to_string()))?;

    let Some(attribute) = doc.descendants().find(|node| {
        node.has_tag_name("Attribute") && node.attribute("Name") == Some(ROLE_ATTRIBUTE)
    }) else {
        return Ok(Vec::new());
    };

    Ok(attribute
        .children()
        .filter(|node| node.has_tag_name("AttributeValue"))
        .filter_map(|node| node.text())
        .filter_map(aws_role)
        .collect())
}

fn aws_role(value: &str) -> Option<AwsRole> {
    let (first, second) = value.trim().split_once(',')?;
    let (first, second) = (first.trim(), second.trim());
    let (role_arn, principal_arn) = if first.contains(":role/") {
        (first, second)
    } else if second.contains(":role/") {
        (second, first)
    } else {
        return None;
    };
    Some(AwsRole {
        role_arn: role_arn.to_string(),
        principal_arn: principal_arn.to_string(),
    })
}

/// Extract the `SAMLResponse` form input from an assertion page.
fn parse_saml_response(page: &str) -> Option<String> {
    page.split("<input")
        .skip(1)
        .filter_map(|input| input.split('>').next())
        .find(|tag| attribute(tag, "name") == Some("SAMLResponse"))
        .and_then(|tag| attribute(tag, "value"))
        .map(decode_entities)
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=\"");
    tag.match_indices(&needle)
        .find(|(index, _)| tag[..*index].ends_with(char::is_whitespace))
        .and_then(|(index, _)| {
            let value = &tag[index + needle.len()..];
            value.find('"').map(|end| &value[..end])
        })
}

fn decode_entities(value: &str) -> String {
    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        rest = &rest[start..];
        let entity = rest
            .find(';')
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match entity {
            Some((c, end)) => {
                decoded.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
