//! EWS folder service abstraction and the SOAP client implementing it

use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, trace};
use url::Url;

use crate::error::{status_error, EwsError, Result};
use crate::models::{FolderId, FolderPage, FolderRef, FolderTagState, RetentionTag, TagUpdate};

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// MAPI PR_FOLDER_PATHNAME, only readable through an extended property
const FOLDER_PATH_PROPERTY_TAG: &str = "0x66b5";

/// The transport encodes path separators as U+FFFE
const PATH_SEPARATOR_PLACEHOLDER: char = '\u{FFFE}';

/// Which folder tree a traversal starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootScope {
    /// The regular mailbox folder tree
    Mailbox,
    /// The online archive folder tree
    Archive,
}

impl RootScope {
    pub fn distinguished_folder_id(&self) -> &'static str {
        match self {
            RootScope::Mailbox => "msgfolderroot",
            RootScope::Archive => "archivemsgfolderroot",
        }
    }
}

/// Folder operations the traversal and removal logic depend on.
///
/// Everything above this trait is transport-agnostic; `EwsClient` is the
/// production implementation and tests substitute a mock.
#[async_trait]
pub trait FolderService: Send + Sync {
    /// Fetch one page of the deep enumeration under the given root.
    /// The folder shape is identifiers plus display name only.
    async fn find_folders_page(
        &self,
        scope: RootScope,
        offset: usize,
        page_size: usize,
    ) -> Result<FolderPage>;

    /// Re-read a folder by identifier to get its current tag slots.
    /// Enumeration does not include tag fields, so this is a fresh bind.
    async fn read_folder_tags(&self, id: &FolderId) -> Result<FolderTagState>;

    /// Resolve the slash-delimited path of a folder. Costs an extra round
    /// trip; the result is not cached across folders.
    async fn resolve_folder_path(&self, id: &FolderId) -> Result<String>;

    /// Persist staged tag clears in a single update call
    async fn update_folder(&self, id: &FolderId, update: &TagUpdate) -> Result<()>;
}

/// Replace the transport's path separator placeholder with `/`.
///
/// Kept as a pure boundary function so a transport that changes its encoding
/// only touches this one place.
pub fn normalize_folder_path(raw: &str) -> String {
    if raw.contains(PATH_SEPARATOR_PLACEHOLDER) {
        raw.replace(PATH_SEPARATOR_PLACEHOLDER, "/")
    } else {
        raw.to_string()
    }
}

/// EWS SOAP client, one instance per authenticated session
pub struct EwsClient {
    http: reqwest::Client,
    endpoint: Url,
    mailbox: String,
    username: String,
    password: String,
    impersonate: bool,
}

impl EwsClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: Url,
        mailbox: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        impersonate: bool,
    ) -> Self {
        Self {
            http,
            endpoint,
            mailbox: mailbox.into(),
            username: username.into(),
            password: password.into(),
            impersonate,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Wrap a request body in the SOAP envelope, including the impersonation
    /// header when enabled
    fn envelope(&self, body: &str) -> String {
        let impersonation = if self.impersonate {
            format!(
                "<t:ExchangeImpersonation><t:ConnectingSID>\
                 <t:PrimarySmtpAddress>{}</t:PrimarySmtpAddress>\
                 </t:ConnectingSID></t:ExchangeImpersonation>",
                escape(self.mailbox.as_str())
            )
        } else {
            String::new()
        };

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"
               xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types"
               xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages">
  <soap:Header>
    <t:RequestServerVersion Version="Exchange2013_SP1"/>
    {impersonation}
  </soap:Header>
  <soap:Body>
    {body}
  </soap:Body>
</soap:Envelope>"#
        )
    }

    /// POST a SOAP request and return the raw response body.
    /// Response-level errors are surfaced by the per-call parsers.
    async fn send(&self, body: &str) -> Result<String> {
        let envelope = self.envelope(body);
        trace!("EWS request: {}", envelope);

        let response = self
            .http
            .post(self.endpoint.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        trace!("EWS response ({}): {}", status, text);

        // EWS returns SOAP faults with HTTP 500; map those through the
        // response parser instead of the status code
        if !status.is_success() && status.as_u16() != 500 {
            return Err(status_error(status));
        }

        Ok(text)
    }

    fn find_folder_body(&self, scope: RootScope, offset: usize, page_size: usize) -> String {
        format!(
            r#"<m:FindFolder Traversal="Deep">
      <m:FolderShape>
        <t:BaseShape>Default</t:BaseShape>
        <t:AdditionalProperties>
          <t:FieldURI FieldURI="folder:DisplayName"/>
        </t:AdditionalProperties>
      </m:FolderShape>
      <m:IndexedPageFolderView MaxEntriesReturned="{page_size}" Offset="{offset}" BasePoint="Beginning"/>
      <m:ParentFolderIds>
        <t:DistinguishedFolderId Id="{root}">
          <t:Mailbox><t:EmailAddress>{mailbox}</t:EmailAddress></t:Mailbox>
        </t:DistinguishedFolderId>
      </m:ParentFolderIds>
    </m:FindFolder>"#,
            root = scope.distinguished_folder_id(),
            mailbox = escape(self.mailbox.as_str()),
        )
    }

    fn get_folder_body(id: &FolderId, with_path: bool) -> String {
        let additional = if with_path {
            format!(
                "<t:AdditionalProperties>\
                 <t:ExtendedFieldURI PropertyTag=\"{FOLDER_PATH_PROPERTY_TAG}\" PropertyType=\"String\"/>\
                 </t:AdditionalProperties>"
            )
        } else {
            String::new()
        };

        format!(
            r#"<m:GetFolder>
      <m:FolderShape>
        <t:BaseShape>AllProperties</t:BaseShape>
        {additional}
      </m:FolderShape>
      <m:FolderIds><t:FolderId Id="{id}"/></m:FolderIds>
    </m:GetFolder>"#,
            id = escape(id.id.as_str()),
        )
    }

    fn update_folder_body(id: &FolderId, update: &TagUpdate) -> String {
        let mut deletions = String::new();
        if update.clear_archive {
            deletions.push_str(
                "<t:DeleteFolderField><t:FieldURI FieldURI=\"folder:ArchiveTag\"/></t:DeleteFolderField>",
            );
        }
        if update.clear_policy {
            deletions.push_str(
                "<t:DeleteFolderField><t:FieldURI FieldURI=\"folder:PolicyTag\"/></t:DeleteFolderField>",
            );
        }

        let change_key = match &id.change_key {
            Some(key) => format!(" ChangeKey=\"{}\"", escape(key.as_str())),
            None => String::new(),
        };

        format!(
            r#"<m:UpdateFolder>
      <m:FolderChanges>
        <t:FolderChange>
          <t:FolderId Id="{id}"{change_key}/>
          <t:Updates>{deletions}</t:Updates>
        </t:FolderChange>
      </m:FolderChanges>
    </m:UpdateFolder>"#,
            id = escape(id.id.as_str()),
        )
    }
}

#[async_trait]
impl FolderService for EwsClient {
    async fn find_folders_page(
        &self,
        scope: RootScope,
        offset: usize,
        page_size: usize,
    ) -> Result<FolderPage> {
        debug!(
            "FindFolder {} offset={} page_size={}",
            scope.distinguished_folder_id(),
            offset,
            page_size
        );
        let body = self.find_folder_body(scope, offset, page_size);
        let response = self.send(&body).await?;
        parse_find_folder_response(&response)
    }

    async fn read_folder_tags(&self, id: &FolderId) -> Result<FolderTagState> {
        debug!("GetFolder (tags) {}", id);
        let body = Self::get_folder_body(id, false);
        let response = self.send(&body).await?;
        parse_folder_tags_response(&response)
    }

    async fn resolve_folder_path(&self, id: &FolderId) -> Result<String> {
        debug!("GetFolder (path) {}", id);
        let body = Self::get_folder_body(id, true);
        let response = self.send(&body).await?;
        let raw = parse_folder_path_response(&response)?;
        Ok(normalize_folder_path(&raw))
    }

    async fn update_folder(&self, id: &FolderId, update: &TagUpdate) -> Result<()> {
        debug!(
            "UpdateFolder {} clear_archive={} clear_policy={}",
            id, update.clear_archive, update.clear_policy
        );
        let body = Self::update_folder_body(id, update);
        let response = self.send(&body).await?;
        check_response_class(&response)
    }
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| EwsError::Xml(err.to_string()))?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|err| EwsError::Xml(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    match reader.read_event() {
        Ok(Event::Text(t)) => Ok(t
            .unescape()
            .map_err(|err| EwsError::Xml(err.to_string()))?
            .into_owned()),
        Ok(_) => Ok(String::new()),
        Err(err) => Err(EwsError::Xml(err.to_string())),
    }
}

/// FindFolder returns typed folder elements; all of them carry the same
/// id/name shape
fn is_folder_element(name: &[u8]) -> bool {
    name == b"Folder"
        || name == b"CalendarFolder"
        || name == b"ContactsFolder"
        || name == b"TasksFolder"
        || name == b"SearchFolder"
}

/// Surface ResponseClass="Error" messages as a structured error. Returns
/// `Ok` for Success and Warning classes.
fn check_response_class(xml: &str) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_error_message = false;
    let mut code = String::new();
    let mut message = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name.ends_with(b"ResponseMessage") {
                    if let Some(class) = attr_value(&e, "ResponseClass")? {
                        in_error_message = class == "Error";
                    }
                } else if in_error_message && name == b"ResponseCode" {
                    code = read_text(&mut reader)?;
                } else if in_error_message && name == b"MessageText" {
                    message = read_text(&mut reader)?;
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(EwsError::Xml(err.to_string())),
            _ => {}
        }
    }

    if !code.is_empty() && code != "NoError" {
        return Err(EwsError::Soap { code, message });
    }
    Ok(())
}

fn parse_find_folder_response(xml: &str) -> Result<FolderPage> {
    check_response_class(xml)?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut folders = Vec::new();
    let mut more_available = false;
    let mut current_id: Option<FolderId> = None;
    let mut current_name: Option<String> = None;
    let mut depth_in_folder = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"RootFolder" {
                    if let Some(last) = attr_value(&e, "IncludesLastItemInRange")? {
                        more_available = last == "false";
                    }
                } else if is_folder_element(name) {
                    depth_in_folder += 1;
                } else if name == b"DisplayName" && depth_in_folder > 0 {
                    current_name = Some(read_text(&mut reader)?);
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"RootFolder" {
                    if let Some(last) = attr_value(&e, "IncludesLastItemInRange")? {
                        more_available = last == "false";
                    }
                } else if name == b"FolderId" && depth_in_folder > 0 {
                    let id = attr_value(&e, "Id")?
                        .ok_or_else(|| EwsError::Xml("FolderId without Id".to_string()))?;
                    current_id = Some(match attr_value(&e, "ChangeKey")? {
                        Some(key) => FolderId::with_change_key(id, key),
                        None => FolderId::new(id),
                    });
                }
            }
            Ok(Event::End(e)) => {
                if is_folder_element(e.local_name().as_ref()) {
                    depth_in_folder = depth_in_folder.saturating_sub(1);
                    if depth_in_folder == 0 {
                        if let Some(id) = current_id.take() {
                            folders.push(FolderRef {
                                id,
                                display_name: current_name.take().unwrap_or_default(),
                            });
                        }
                        current_name = None;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(EwsError::Xml(err.to_string())),
            _ => {}
        }
    }

    Ok(FolderPage {
        folders,
        more_available,
    })
}

fn parse_folder_tags_response(xml: &str) -> Result<FolderTagState> {
    check_response_class(xml)?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut id: Option<FolderId> = None;
    let mut archive_tag = None;
    let mut policy_tag = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"ArchiveTag" {
                    let value = read_text(&mut reader)?;
                    if !value.is_empty() {
                        archive_tag = Some(RetentionTag::new(value));
                    }
                } else if name == b"PolicyTag" {
                    let value = read_text(&mut reader)?;
                    if !value.is_empty() {
                        policy_tag = Some(RetentionTag::new(value));
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                // keep the first FolderId only, nested ParentFolderId elements
                // carry the same shape
                if e.local_name().as_ref() == b"FolderId" && id.is_none() {
                    if let Some(folder_id) = attr_value(&e, "Id")? {
                        id = Some(match attr_value(&e, "ChangeKey")? {
                            Some(key) => FolderId::with_change_key(folder_id, key),
                            None => FolderId::new(folder_id),
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(EwsError::Xml(err.to_string())),
            _ => {}
        }
    }

    let id = id.ok_or_else(|| EwsError::Xml("GetFolder response without FolderId".to_string()))?;

    Ok(FolderTagState {
        id,
        archive_tag,
        policy_tag,
    })
}

fn parse_folder_path_response(xml: &str) -> Result<String> {
    check_response_class(xml)?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_extended_property = false;
    let mut is_path_property = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if name == b"ExtendedProperty" {
                    in_extended_property = true;
                    is_path_property = false;
                } else if name == b"Value" && in_extended_property && is_path_property {
                    return read_text(&mut reader);
                }
            }
            Ok(Event::Empty(e)) => {
                if in_extended_property && e.local_name().as_ref() == b"ExtendedFieldURI" {
                    if let Some(tag) = attr_value(&e, "PropertyTag")? {
                        is_path_property = tag.eq_ignore_ascii_case(FOLDER_PATH_PROPERTY_TAG);
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"ExtendedProperty" {
                    in_extended_property = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(EwsError::Xml(err.to_string())),
            _ => {}
        }
    }

    Err(EwsError::Xml(
        "GetFolder response without folder path property".to_string(),
    ))
}
