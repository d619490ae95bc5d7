//! Session establishment: credentials, endpoint resolution, autodiscovery

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::CONTENT_TYPE;
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::EwsClient;
use crate::error::{EwsError, Result};

/// Environment variables consulted when no explicit credentials are given
pub const USERNAME_ENV: &str = "EWS_USERNAME";
pub const PASSWORD_ENV: &str = "EWS_PASSWORD";

/// Autodiscovery follows at most this many redirect hops
const MAX_REDIRECT_HOPS: usize = 3;

const AUTODISCOVER_REQUEST_SCHEMA: &str =
    "http://schemas.microsoft.com/exchange/autodiscover/outlook/requestschema/2006";
const AUTODISCOVER_RESPONSE_SCHEMA: &str =
    "http://schemas.microsoft.com/exchange/autodiscover/outlook/responseschema/2006a";

/// How the EWS endpoint is located
#[derive(Debug, Clone)]
pub enum EndpointMode {
    /// POX autodiscovery against the mailbox domain
    Autodiscover { allow_redirection: bool },
    /// A fixed endpoint, e.g. https://server/EWS/Exchange.asmx
    Explicit(Url),
}

/// Where the HTTP basic-auth credentials come from
#[derive(Debug, Clone)]
pub enum CredentialMode {
    /// Username and password given on the command line
    Explicit { username: String, password: String },
    /// Read from EWS_USERNAME / EWS_PASSWORD
    Environment,
}

/// Everything needed to produce an authenticated session
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Primary SMTP address of the mailbox being swept
    pub mailbox: String,
    pub endpoint: EndpointMode,
    pub credentials: CredentialMode,
    /// Act as the target mailbox (requires ApplicationImpersonation)
    pub impersonate: bool,
    /// Skip TLS certificate validation
    pub ignore_certificate: bool,
}

/// Establish an authenticated session. Fails before any traversal begins.
pub async fn connect(settings: &ConnectionSettings) -> Result<EwsClient> {
    info!("Connecting to mailbox {}", settings.mailbox);

    let (username, password) = resolve_credentials(&settings.credentials)?;
    let http = build_http_client(settings.ignore_certificate)?;

    let endpoint = match &settings.endpoint {
        EndpointMode::Explicit(url) => {
            debug!("Using explicit EWS endpoint {}", url);
            url.clone()
        }
        EndpointMode::Autodiscover { allow_redirection } => {
            autodiscover_endpoint(&http, &settings.mailbox, *allow_redirection).await?
        }
    };

    Ok(EwsClient::new(
        http,
        endpoint,
        settings.mailbox.clone(),
        username,
        password,
        settings.impersonate,
    ))
}

fn resolve_credentials(mode: &CredentialMode) -> Result<(String, String)> {
    match mode {
        CredentialMode::Explicit { username, password } => {
            Ok((username.clone(), password.clone()))
        }
        CredentialMode::Environment => {
            let username = env::var(USERNAME_ENV).map_err(|_| {
                EwsError::Connection(format!(
                    "no credentials given and {} is not set",
                    USERNAME_ENV
                ))
            })?;
            let password = env::var(PASSWORD_ENV).map_err(|_| {
                EwsError::Connection(format!(
                    "no credentials given and {} is not set",
                    PASSWORD_ENV
                ))
            })?;
            Ok((username, password))
        }
    }
}

fn build_http_client(ignore_certificate: bool) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(30));

    if ignore_certificate {
        warn!("TLS certificate validation is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| EwsError::Connection(format!("failed to build HTTP client: {}", e)))
}

/// The mailbox domain, used to derive autodiscovery candidates
fn mailbox_domain(mailbox: &str) -> Result<&str> {
    mailbox
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .ok_or_else(|| {
            EwsError::Autodiscover(format!("\"{}\" is not a valid smtp address", mailbox))
        })
}

/// The well-known POX autodiscovery URLs for a domain, in probe order
fn autodiscover_candidates(domain: &str) -> Vec<String> {
    vec![
        format!("https://{}/autodiscover/autodiscover.xml", domain),
        format!("https://autodiscover.{}/autodiscover/autodiscover.xml", domain),
    ]
}

/// Redirects are only followed to https targets
fn is_acceptable_redirect(url: &str) -> bool {
    url.to_lowercase().starts_with("https://")
}

fn autodiscover_request_body(mailbox: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<Autodiscover xmlns="{AUTODISCOVER_REQUEST_SCHEMA}">
  <Request>
    <EMailAddress>{mailbox}</EMailAddress>
    <AcceptableResponseSchema>{AUTODISCOVER_RESPONSE_SCHEMA}</AcceptableResponseSchema>
  </Request>
</Autodiscover>"#,
        mailbox = escape(mailbox),
    )
}

/// One parsed POX autodiscovery response
#[derive(Debug, Default)]
struct AutodiscoverOutcome {
    ews_url: Option<String>,
    redirect_url: Option<String>,
    redirect_addr: Option<String>,
}

fn parse_autodiscover_response(xml: &str) -> Result<AutodiscoverOutcome> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut outcome = AutodiscoverOutcome::default();
    let mut element = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                element = e.local_name().as_ref().to_vec();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|err| EwsError::Xml(err.to_string()))?
                    .into_owned();
                if element == b"EwsUrl" && outcome.ews_url.is_none() {
                    outcome.ews_url = Some(text);
                } else if element == b"RedirectUrl" {
                    outcome.redirect_url = Some(text);
                } else if element == b"RedirectAddr" {
                    outcome.redirect_addr = Some(text);
                }
            }
            Ok(Event::End(_)) => element.clear(),
            Ok(Event::Eof) => break,
            Err(err) => return Err(EwsError::Xml(err.to_string())),
            _ => {}
        }
    }

    Ok(outcome)
}

/// Resolve the EWS endpoint for a mailbox via POX autodiscovery.
///
/// Probes the well-known candidate URLs for the mailbox domain. Redirect
/// responses (URL or address) are only honored when redirection is allowed,
/// only towards https targets, and for a bounded number of hops.
pub async fn autodiscover_endpoint(
    http: &reqwest::Client,
    mailbox: &str,
    allow_redirection: bool,
) -> Result<Url> {
    let mut mailbox = mailbox.to_string();
    let mut hops = 0;

    loop {
        let domain = mailbox_domain(&mailbox)?;
        let body = autodiscover_request_body(&mailbox);
        let mut last_error: Option<EwsError> = None;
        let mut redirect: Option<(bool, String)> = None;

        for candidate in autodiscover_candidates(domain) {
            debug!("Probing autodiscover endpoint {}", candidate);

            let response = match http
                .post(&candidate)
                .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    debug!("Autodiscover candidate {} unreachable: {}", candidate, e);
                    last_error = Some(e.into());
                    continue;
                }
            };

            if !response.status().is_success() {
                debug!(
                    "Autodiscover candidate {} answered {}",
                    candidate,
                    response.status()
                );
                last_error = Some(EwsError::Autodiscover(format!(
                    "{} answered HTTP {}",
                    candidate,
                    response.status().as_u16()
                )));
                continue;
            }

            let text = response.text().await?;
            let outcome = parse_autodiscover_response(&text)?;

            if let Some(ews_url) = outcome.ews_url {
                info!("Autodiscover resolved EWS endpoint {}", ews_url);
                return Url::parse(&ews_url)
                    .map_err(|e| EwsError::Autodiscover(format!("invalid EwsUrl: {}", e)));
            }
            if let Some(url) = outcome.redirect_url {
                redirect = Some((true, url));
                break;
            }
            if let Some(addr) = outcome.redirect_addr {
                redirect = Some((false, addr));
                break;
            }

            last_error = Some(EwsError::Autodiscover(format!(
                "{} returned no usable settings",
                candidate
            )));
        }

        match redirect {
            Some((is_url, target)) => {
                if !allow_redirection {
                    return Err(EwsError::Autodiscover(format!(
                        "redirected to \"{}\" but redirection is not allowed",
                        target
                    )));
                }
                hops += 1;
                if hops > MAX_REDIRECT_HOPS {
                    return Err(EwsError::Autodiscover(
                        "too many autodiscover redirects".to_string(),
                    ));
                }
                if is_url {
                    if !is_acceptable_redirect(&target) {
                        return Err(EwsError::Autodiscover(format!(
                            "refusing non-https redirect to \"{}\"",
                            target
                        )));
                    }
                    debug!("Following autodiscover redirect to {}", target);
                    let url = Url::parse(&target)
                        .map_err(|e| EwsError::Autodiscover(format!("invalid redirect: {}", e)))?;
                    let response = http
                        .post(url)
                        .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                        .body(autodiscover_request_body(&mailbox))
                        .send()
                        .await?;
                    let outcome = parse_autodiscover_response(&response.text().await?)?;
                    if let Some(ews_url) = outcome.ews_url {
                        info!("Autodiscover resolved EWS endpoint {}", ews_url);
                        return Url::parse(&ews_url)
                            .map_err(|e| EwsError::Autodiscover(format!("invalid EwsUrl: {}", e)));
                    }
                    if let Some(addr) = outcome.redirect_addr {
                        mailbox = addr;
                        continue;
                    }
                    return Err(EwsError::Autodiscover(
                        "redirect target returned no usable settings".to_string(),
                    ));
                } else {
                    debug!("Autodiscover redirected to address {}", target);
                    mailbox = target;
                    continue;
                }
            }
            None => {
                return Err(last_error.unwrap_or_else(|| {
                    EwsError::Autodiscover(format!(
                        "no autodiscover endpoint answered for {}",
                        mailbox
                    ))
                }));
            }
        }
    }
}
