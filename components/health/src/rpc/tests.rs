use super::*;
use crate::testonly::{self, MockNode, Reply};
use assert_matches::assert_matches;
use blockprobe_concurrency::testonly::init_logging;
use test_casing::test_casing;

const RPC_TIMEOUT: time::Duration = time::Duration::seconds(5);

#[test]
fn test_request_encoding() {
    assert_eq!(
        serde_json::to_string(&Request::block_number()).unwrap(),
        r#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":1}"#
    );
}

#[test_casing(6, [
    ("0x3E8", 1000),
    ("0x3e8", 1000),
    ("1000", 1000),
    ("0x0", 0),
    ("0", 0),
    ("0x7fffffffffffffff", i64::MAX),
])]
#[test]
fn test_parse_block_number(input: &str, want: Height) {
    assert_eq!(parse_block_number(input).unwrap(), want);
}

#[test_casing(8, ["", "0x", "abc", "0xZZ", "3E8", "0x-3E8", "0x+3E8", "0x-"])]
#[test]
fn test_parse_invalid_block_number(input: &str) {
    assert!(parse_block_number(input).is_err());
}

#[test]
fn test_response_block_number() {
    let decode = |s: &str| serde_json::from_str::<Response>(s).unwrap().block_number();
    assert_eq!(
        decode(r#"{"jsonrpc":"2.0","result":"0x3E8","id":1}"#).unwrap(),
        1000
    );
    assert_matches!(
        decode(r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"not found"},"id":1}"#),
        Err(QueryError::Rpc(ErrorObject { code: -32601, .. }))
    );
    assert_matches!(
        decode(r#"{"jsonrpc":"2.0","id":1}"#),
        Err(QueryError::MissingResult)
    );
    assert_matches!(
        decode(r#"{"jsonrpc":"2.0","result":"garbage","id":1}"#),
        Err(QueryError::InvalidNumber(s, _)) if s == "garbage"
    );
}

#[test]
fn test_response_decode_rejects_non_objects() {
    for body in [
        r#"["2.0","0x10",null,1]"#,
        r#""0x10""#,
        "16",
        r#"{"jsonrpc":"2.0","result":"0x10","id":"abc"}"#,
        r#"{"jsonrpc":"2.0","result":16,"id":1}"#,
    ] {
        assert!(Response::decode(body.as_bytes()).is_err(), "{body}");
    }
    let resp = Response::decode(br#"{"jsonrpc":"2.0","result":"0x10","id":null}"#).unwrap();
    assert_eq!(resp.block_number().unwrap(), 16);
}

#[tokio::test]
async fn test_query_array_response() {
    init_logging();
    let ctx = &ctx::root();
    let node = MockNode::spawn(Reply::Http(
        StatusCode::OK,
        r#"["2.0","0x10",null,1]"#.into(),
    ))
    .await;
    let client = Client::new(RPC_TIMEOUT);
    assert_matches!(
        client.block_number(ctx, &node.url()).await.unwrap(),
        Err(QueryError::Decode(_))
    );
}

#[test]
fn test_node_url() {
    let url: NodeUrl = "localhost:8545".parse().unwrap();
    assert_eq!(url.uri().scheme_str(), Some("http"));
    assert_eq!(url.uri().host(), Some("localhost"));
    assert_eq!(url.uri().port_u16(), Some(8545));

    let url: NodeUrl = "http://10.0.0.1:8545/rpc".parse().unwrap();
    assert_eq!(url.uri().path(), "/rpc");

    assert!("https://mainnet.example.com".parse::<NodeUrl>().is_err());
    assert!("ws://localhost:8546".parse::<NodeUrl>().is_err());
    assert!("".parse::<NodeUrl>().is_err());
    assert!("http://".parse::<NodeUrl>().is_err());
}

#[tokio::test]
async fn test_query_hex_height() {
    init_logging();
    let ctx = &ctx::root();
    let node = MockNode::with_height(1000).await;
    let client = Client::new(RPC_TIMEOUT);
    let got = client.block_number(ctx, &node.url()).await.unwrap().unwrap();
    assert_eq!(got, 1000);

    let requests = node.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        &requests[0][..],
        br#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":1}"#
    );
}

#[tokio::test]
async fn test_query_decimal_height() {
    init_logging();
    let ctx = &ctx::root();
    let node = MockNode::spawn(Reply::Http(
        StatusCode::OK,
        r#"{"jsonrpc":"2.0","result":"1000","id":1}"#.into(),
    ))
    .await;
    let client = Client::new(RPC_TIMEOUT);
    assert_eq!(
        client.block_number(ctx, &node.url()).await.unwrap().unwrap(),
        1000
    );
}

#[tokio::test]
async fn test_query_bad_status() {
    init_logging();
    let ctx = &ctx::root();
    let node = MockNode::spawn(Reply::Http(
        StatusCode::SERVICE_UNAVAILABLE,
        r#"{"jsonrpc":"2.0","result":"0x10","id":1}"#.into(),
    ))
    .await;
    let client = Client::new(RPC_TIMEOUT);
    assert_matches!(
        client.block_number(ctx, &node.url()).await.unwrap(),
        Err(QueryError::Status(StatusCode::SERVICE_UNAVAILABLE))
    );

    // Any success status other than exactly 200 is rejected as well.
    node.set_reply(Reply::Http(StatusCode::ACCEPTED, String::new()));
    assert_matches!(
        client.block_number(ctx, &node.url()).await.unwrap(),
        Err(QueryError::Status(StatusCode::ACCEPTED))
    );
}

#[tokio::test]
async fn test_query_malformed_json() {
    init_logging();
    let ctx = &ctx::root();
    let node = MockNode::spawn(Reply::Http(StatusCode::OK, "<html>".into())).await;
    let client = Client::new(RPC_TIMEOUT);
    assert_matches!(
        client.block_number(ctx, &node.url()).await.unwrap(),
        Err(QueryError::Decode(_))
    );
}

#[tokio::test]
async fn test_query_unreachable() {
    init_logging();
    let ctx = &ctx::root();
    let client = Client::new(RPC_TIMEOUT);
    let url = testonly::unreachable_url().await;
    assert_matches!(
        client.block_number(ctx, &url).await.unwrap(),
        Err(QueryError::Transport(_))
    );
}

#[tokio::test]
async fn test_query_timeout() {
    init_logging();
    let ctx = &ctx::root();
    let node = MockNode::spawn(Reply::Hang).await;
    let client = Client::new(time::Duration::milliseconds(100));
    assert_matches!(
        client.block_number(ctx, &node.url()).await.unwrap(),
        Err(QueryError::Timeout(_))
    );
}

#[tokio::test]
async fn test_query_canceled() {
    init_logging();
    let ctx = &ctx::root();
    let node = MockNode::spawn(Reply::Hang).await;
    let client = Client::new(RPC_TIMEOUT);
    let url = node.url();
    let (res, ()) = tokio::join!(client.block_number(ctx, &url), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        ctx.cancel();
    });
    assert_matches!(res, Err(ctx::Canceled));
}
