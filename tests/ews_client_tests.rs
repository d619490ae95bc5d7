//! HTTP-level tests for the EWS SOAP client against a wiremock server

use ews_retention_sweep::client::{EwsClient, FolderService, RootScope};
use ews_retention_sweep::error::EwsError;
use ews_retention_sweep::models::{FolderId, TagKind, TagUpdate};
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EWS_PATH: &str = "/EWS/Exchange.asmx";

fn client_for(server: &MockServer, impersonate: bool) -> EwsClient {
    let endpoint = Url::parse(&format!("{}{}", server.uri(), EWS_PATH)).unwrap();
    EwsClient::new(
        reqwest::Client::new(),
        endpoint,
        "user@example.com",
        "svc@example.com",
        "secret",
        impersonate,
    )
}

fn soap_envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>{body}</s:Body>
</s:Envelope>"#
    )
}

fn find_folder_response(folders: &[(&str, &str)], more_available: bool) -> String {
    let folder_xml: String = folders
        .iter()
        .map(|(id, name)| {
            format!(
                r#"<t:Folder><t:FolderId Id="{id}" ChangeKey="CK"/><t:DisplayName>{name}</t:DisplayName></t:Folder>"#
            )
        })
        .collect();

    soap_envelope(&format!(
        r#"<m:FindFolderResponse xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages" xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types">
  <m:ResponseMessages>
    <m:FindFolderResponseMessage ResponseClass="Success">
      <m:ResponseCode>NoError</m:ResponseCode>
      <m:RootFolder IncludesLastItemInRange="{last}" TotalItemsInView="{total}">
        <t:Folders>{folder_xml}</t:Folders>
      </m:RootFolder>
    </m:FindFolderResponseMessage>
  </m:ResponseMessages>
</m:FindFolderResponse>"#,
        last = !more_available,
        total = folders.len(),
    ))
}

#[tokio::test]
async fn test_find_folders_page_request_shape_and_parse() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .and(body_string_contains(r#"Traversal="Deep""#))
        .and(body_string_contains(
            r#"MaxEntriesReturned="100" Offset="0" BasePoint="Beginning""#,
        ))
        .and(body_string_contains(r#"DistinguishedFolderId Id="msgfolderroot""#))
        .and(body_string_contains(r#"FieldURI="folder:DisplayName""#))
        .and(body_string_contains("user@example.com"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(find_folder_response(
                &[("AAMk1", "Inbox"), ("AAMk2", "Sent Items")],
                false,
            )),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, false);
    let page = client
        .find_folders_page(RootScope::Mailbox, 0, 100)
        .await
        .unwrap();

    assert_eq!(page.folders.len(), 2);
    assert!(!page.more_available);
    assert_eq!(page.folders[0].id.id, "AAMk1");
    assert_eq!(page.folders[1].display_name, "Sent Items");

    // basic auth goes out with every request
    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_some());
}

#[tokio::test]
async fn test_find_folders_page_archive_scope_and_offset() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .and(body_string_contains(
            r#"DistinguishedFolderId Id="archivemsgfolderroot""#,
        ))
        .and(body_string_contains(r#"Offset="300""#))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(find_folder_response(&[("AAMk3", "Archive Inbox")], true)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, false);
    let page = client
        .find_folders_page(RootScope::Archive, 300, 100)
        .await
        .unwrap();

    assert_eq!(page.folders.len(), 1);
    assert!(page.more_available);
}

#[tokio::test]
async fn test_read_folder_tags_round_trip() {
    let server = MockServer::start().await;

    let response = soap_envelope(
        r#"<m:GetFolderResponse xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages" xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types">
  <m:ResponseMessages>
    <m:GetFolderResponseMessage ResponseClass="Success">
      <m:ResponseCode>NoError</m:ResponseCode>
      <m:Folders>
        <t:Folder>
          <t:FolderId Id="AAMk1" ChangeKey="CQAAABYA"/>
          <t:DisplayName>Invoices</t:DisplayName>
          <t:ArchiveTag IsExplicit="true">a7966968-dadf-4df7-ae87-4482686b4634</t:ArchiveTag>
          <t:PolicyTag IsExplicit="true">0f8e1f84-94f4-42a3-a1aa-51ba18066f5a</t:PolicyTag>
        </t:Folder>
      </m:Folders>
    </m:GetFolderResponseMessage>
  </m:ResponseMessages>
</m:GetFolderResponse>"#,
    );

    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .and(body_string_contains("GetFolder"))
        .and(body_string_contains(r#"FolderId Id="AAMk1""#))
        .and(body_string_contains("<t:BaseShape>AllProperties</t:BaseShape>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(response))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, false);
    let state = client
        .read_folder_tags(&FolderId::new("AAMk1"))
        .await
        .unwrap();

    assert_eq!(state.id.change_key.as_deref(), Some("CQAAABYA"));
    assert_eq!(
        state.archive_tag.as_ref().unwrap().retention_id,
        "a7966968-dadf-4df7-ae87-4482686b4634"
    );
    assert_eq!(
        state.policy_tag.as_ref().unwrap().retention_id,
        "0f8e1f84-94f4-42a3-a1aa-51ba18066f5a"
    );
}

#[tokio::test]
async fn test_resolve_folder_path_normalizes_placeholder() {
    let server = MockServer::start().await;

    let response = soap_envelope(
        r#"<m:GetFolderResponse xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages" xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types">
  <m:ResponseMessages>
    <m:GetFolderResponseMessage ResponseClass="Success">
      <m:ResponseCode>NoError</m:ResponseCode>
      <m:Folders>
        <t:Folder>
          <t:FolderId Id="AAMk1" ChangeKey="CQAAABYA"/>
          <t:ExtendedProperty>
            <t:ExtendedFieldURI PropertyTag="0x66b5" PropertyType="String"/>
            <t:Value>&#65534;Inbox&#65534;Invoices</t:Value>
          </t:ExtendedProperty>
        </t:Folder>
      </m:Folders>
    </m:GetFolderResponseMessage>
  </m:ResponseMessages>
</m:GetFolderResponse>"#,
    );

    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .and(body_string_contains(r#"PropertyTag="0x66b5""#))
        .respond_with(ResponseTemplate::new(200).set_body_string(response))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, false);
    let path = client
        .resolve_folder_path(&FolderId::new("AAMk1"))
        .await
        .unwrap();

    assert_eq!(path, "/Inbox/Invoices");
}

#[tokio::test]
async fn test_update_folder_sends_delete_folder_fields() {
    let server = MockServer::start().await;

    let response = soap_envelope(
        r#"<m:UpdateFolderResponse xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages">
  <m:ResponseMessages>
    <m:UpdateFolderResponseMessage ResponseClass="Success">
      <m:ResponseCode>NoError</m:ResponseCode>
    </m:UpdateFolderResponseMessage>
  </m:ResponseMessages>
</m:UpdateFolderResponse>"#,
    );

    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .and(body_string_contains("UpdateFolder"))
        .and(body_string_contains(r#"FieldURI="folder:ArchiveTag""#))
        .and(body_string_contains(r#"FieldURI="folder:PolicyTag""#))
        .and(body_string_contains(r#"ChangeKey="CQAAABYA""#))
        .respond_with(ResponseTemplate::new(200).set_body_string(response))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, false);
    let mut update = TagUpdate::default();
    update.stage_clear(TagKind::Archive);
    update.stage_clear(TagKind::Policy);

    client
        .update_folder(
            &FolderId::with_change_key("AAMk1", "CQAAABYA"),
            &update,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_soap_fault_maps_to_soap_error() {
    let server = MockServer::start().await;

    let response = soap_envelope(
        r#"<m:UpdateFolderResponse xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages">
  <m:ResponseMessages>
    <m:UpdateFolderResponseMessage ResponseClass="Error">
      <m:MessageText>The send or update operation could not be performed because the change key passed in the request does not match the current change key for the item.</m:MessageText>
      <m:ResponseCode>ErrorIrresolvableConflict</m:ResponseCode>
    </m:UpdateFolderResponseMessage>
  </m:ResponseMessages>
</m:UpdateFolderResponse>"#,
    );

    // EWS reports response-level errors with HTTP 500
    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string(response))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, false);
    let mut update = TagUpdate::default();
    update.stage_clear(TagKind::Archive);

    let err = client
        .update_folder(&FolderId::with_change_key("AAMk1", "stale"), &update)
        .await
        .unwrap_err();

    match err {
        EwsError::Soap { code, .. } => assert_eq!(code, "ErrorIrresolvableConflict"),
        other => panic!("expected Soap error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unauthorized_maps_to_connection_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, false);
    let err = client
        .find_folders_page(RootScope::Mailbox, 0, 100)
        .await
        .unwrap_err();

    assert!(matches!(err, EwsError::Connection(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_impersonation_header_included_when_enabled() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(EWS_PATH))
        .and(body_string_contains("ExchangeImpersonation"))
        .and(body_string_contains(
            "<t:PrimarySmtpAddress>user@example.com</t:PrimarySmtpAddress>",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(find_folder_response(&[("AAMk1", "Inbox")], false)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let page = client
        .find_folders_page(RootScope::Mailbox, 0, 100)
        .await
        .unwrap();
    assert_eq!(page.folders.len(), 1);
}
