// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used)]

mod common;

use common::FakeServer;
use pilosa_client::{
    CallOptions, FieldOptions, HttpResponse, IndexOptions, PilosaError, QueryResult, ResultKind, Schema,
};

const NODE: &str = "http://localhost:10101";

#[test]
fn batch_results_align_with_submitted_calls() {
    let server = FakeServer::default();
    server.respond_with(|_| {
        Some(HttpResponse::new(
            200,
            r#"{"results":[5,{"attrs":{"name":"go"},"columns":[1,3]},{"attrs":{},"columns":[1,2,3]}]}"#,
        ))
    });
    let client = server.client(&[NODE]);
    let mut schema = Schema::new();
    let index = schema.index("repository", IndexOptions::default()).unwrap();
    let language = index.field("language", FieldOptions::set()).unwrap();
    let batch = index
        .batch_query([
            index.count(language.row(5).unwrap()).unwrap(),
            language.row(5).unwrap(),
            index.union([language.row(5).unwrap(), language.row(6).unwrap()]).unwrap(),
        ])
        .unwrap();

    let response = client.query(&batch).unwrap();

    let sent = server.requests().pop().unwrap();
    assert_eq!(sent.text(), "Count(Row(language=5))Row(language=5)Union(Row(language=5),Row(language=6))");
    let kinds: Vec<ResultKind> = response.results.iter().map(QueryResult::kind).collect();
    assert_eq!(kinds, vec![ResultKind::Count, ResultKind::Row, ResultKind::Row]);
    assert_eq!(response.results[0].count(), Some(5));
    assert_eq!(response.results[1].row().unwrap().columns, vec![1, 3]);
    assert_eq!(response.results[2].row().unwrap().columns, vec![1, 2, 3]);
}

#[test]
fn short_responses_are_rejected() {
    let server = FakeServer::default();
    server.respond_with(|_| Some(HttpResponse::new(200, r#"{"results":[1]}"#)));
    let client = server.client(&[NODE]);
    let mut schema = Schema::new();
    let index = schema.index("repository", IndexOptions::default()).unwrap();
    let language = index.field("language", FieldOptions::set()).unwrap();
    let batch = index
        .batch_query([index.count(language.row(1).unwrap()).unwrap(), language.row(1).unwrap()])
        .unwrap();
    let err = client.query(&batch).unwrap_err();
    assert!(matches!(err, PilosaError::Codec(_)));
}

#[test]
fn request_options_travel_in_the_url_and_headers() {
    let server = FakeServer::default();
    server.respond_with(|_| {
        Some(HttpResponse::new(
            200,
            r#"{"results":[{"attrs":{},"columns":[7]}],"columnAttrs":[{"id":7,"attrs":{"stars":120}}]}"#,
        ))
    });
    let client = server.client(&[NODE]);
    let mut schema = Schema::new();
    let index = schema.index("repository", IndexOptions::default()).unwrap();
    let language = index.field("language", FieldOptions::set()).unwrap();
    let options = CallOptions {
        column_attrs: true,
        shards: vec![0, 2],
        ..CallOptions::default()
    };

    let response = client.query_with(&language.row(1).unwrap(), &options).unwrap();

    let sent = server.requests().pop().unwrap();
    assert_eq!(sent.path, "/index/repository/query?columnAttrs=true&shards=0,2");
    assert_eq!(sent.header("PQL-Version"), Some("1.0"));
    assert_eq!(sent.header("Content-Type"), Some("application/json"));
    assert_eq!(response.column().unwrap().id, 7);
}

#[test]
fn mutations_report_changes() {
    let server = FakeServer::default();
    let client = server.client(&[NODE]);
    let mut schema = Schema::new();
    let index = schema.index("repository", IndexOptions::default()).unwrap();
    let stars = index.field("stars", FieldOptions::int(0, 100_000)).unwrap();
    let response = client.query(&stars.setvalue(10, 250).unwrap()).unwrap();
    assert_eq!(response.result().unwrap().changed(), Some(true));
    assert_eq!(server.requests()[0].text(), "Set(10,stars=250)");
}

#[test]
fn validation_errors_never_reach_the_network() {
    let server = FakeServer::default();
    let _client = server.client(&[NODE]);
    let mut schema = Schema::new();
    let index = schema.index("repository", IndexOptions::default()).unwrap();
    let language = index.field("language", FieldOptions::set()).unwrap();
    let err = language.row("go").unwrap_err();
    assert!(err.is_validation());
    assert!(index.intersect([]).unwrap_err().is_validation());
    assert!(server.requests().is_empty());
}
