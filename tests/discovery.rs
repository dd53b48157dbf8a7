use repo_harvester::config::{BitbucketConfig, GitHubConfig};
use repo_harvester::harvest::discovery::ApiClient;
use repo_harvester::harvest::{
    BitbucketDiscoverer, Discoverer, DiscoveryError, GitHubDiscoverer, SeedDiscoverer,
};
use repo_harvester::Platform;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> ApiClient {
    ApiClient::from_client(reqwest::Client::new(), Some("secret".to_string()))
}

fn github(server: &MockServer) -> GitHubDiscoverer {
    let config = GitHubConfig {
        api_url: server.uri(),
        ..GitHubConfig::default()
    };
    GitHubDiscoverer::new(client(), &config, 0.5)
}

#[tokio::test]
async fn test_github_page_skips_forks_and_ranks_by_stars() {
    let server = MockServer::start().await;
    let next = format!("{}/repositories?since=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([
                    {"id": 1, "full_name": "octo/alpha", "html_url": "https://github.com/octo/alpha", "fork": false},
                    {"id": 2, "full_name": "octo/copy", "html_url": "https://github.com/octo/copy", "fork": true}
                ]))
                .insert_header("link", format!("<{}>; rel=\"next\"", next).as_str())
                .insert_header("x-ratelimit-remaining", "59")
                .insert_header("x-ratelimit-reset", "1700000000"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "repo:octo/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"full_name": "Octo/Alpha", "stargazers_count": 5000}]
        })))
        .mount(&server)
        .await;

    let mut discoverer = github(&server);
    let batch = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].name, "octo/alpha");
    assert_eq!(batch[0].url, "https://github.com/octo/alpha");
    assert_eq!(batch[0].platform, Platform::GitHub);
    assert!((batch[0].rank - 1.0).abs() < 1e-9);
    assert_eq!(discoverer.cursor(), next);
}

#[tokio::test]
async fn test_github_failed_star_lookup_uses_default_rank() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 7, "full_name": "octo/beta", "html_url": "https://github.com/octo/beta"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let mut discoverer = github(&server);
    let batch = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].rank, 0.5);
    // Without a Link header the cursor continues from the last id.
    assert_eq!(
        discoverer.cursor(),
        format!("{}/repositories?since=7", server.uri())
    );
}

#[tokio::test]
async fn test_github_server_error_keeps_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let mut discoverer = github(&server);
    let before = discoverer.cursor().to_string();
    let err = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DiscoveryError::Status { status: 502, .. }));
    assert!(err.is_transient());
    assert_eq!(discoverer.cursor(), before);
}

#[tokio::test]
async fn test_github_exhausted_quota_is_rate_limited() {
    let server = MockServer::start().await;
    let reset = chrono::Utc::now().timestamp() + 120;
    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str()),
        )
        .mount(&server)
        .await;

    let mut discoverer = github(&server);
    let err = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        DiscoveryError::RateLimited { reset_at } => assert_eq!(reset_at, reset),
        other => panic!("expected rate limit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_seed_discoverer_emits_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"full_name": "rust-lang/rust", "stargazers_count": 1}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut seed = SeedDiscoverer::new(
        vec!["rust-lang/rust".to_string(), "someone/unknown".to_string()],
        github(&server),
    );
    let cancel = CancellationToken::new();

    let batch = seed.produce(&cancel).await.unwrap().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].url, "https://github.com/rust-lang/rust");
    assert_eq!(batch[0].rank, 0.0);
    assert_eq!(batch[1].rank, 0.5);

    assert!(seed.produce(&cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn test_bitbucket_filters_git_and_ranks_by_watchers() {
    let server = MockServer::start().await;
    let watchers = format!("{}/repositories/team/alpha/watchers", server.uri());

    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                {
                    "full_name": "team/alpha",
                    "scm": "git",
                    "created_on": "2014-03-01T10:00:00+00:00",
                    "links": {
                        "html": {"href": "https://bitbucket.org/team/alpha"},
                        "watchers": {"href": watchers}
                    }
                },
                {
                    "full_name": "team/legacy",
                    "scm": "hg",
                    "links": {"html": {"href": "https://bitbucket.org/team/legacy"}}
                },
                {
                    "full_name": "team/quiet",
                    "scm": "git",
                    "links": {"html": {"href": "https://bitbucket.org/team/quiet"}}
                }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/alpha/watchers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"size": 500})))
        .mount(&server)
        .await;

    let config = BitbucketConfig {
        api_url: server.uri(),
        ..BitbucketConfig::default()
    };
    let mut discoverer = BitbucketDiscoverer::new(client(), &config, 0.5);
    let batch = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    let names: Vec<&str> = batch.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["team/alpha", "team/quiet"]);
    assert!(batch.iter().all(|d| d.platform == Platform::Bitbucket));
    assert!((batch[0].rank - 1.0).abs() < 1e-9);
    assert_eq!(batch[1].rank, 0.5);

    // With no `next` page the listing is polled again from the start.
    assert_eq!(discoverer.cursor(), format!("{}/repositories", server.uri()));
}

fn bitbucket(server: &MockServer) -> BitbucketDiscoverer {
    let config = BitbucketConfig {
        api_url: server.uri(),
        ..BitbucketConfig::default()
    };
    BitbucketDiscoverer::new(client(), &config, 0.5)
}

#[tokio::test]
async fn test_bitbucket_watcher_rate_limit_is_propagated() {
    let server = MockServer::start().await;
    let watchers = format!("{}/repositories/team/alpha/watchers", server.uri());

    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{
                "full_name": "team/alpha",
                "scm": "git",
                "links": {
                    "html": {"href": "https://bitbucket.org/team/alpha"},
                    "watchers": {"href": watchers}
                }
            }],
            "next": format!("{}/repositories?page=2", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories/team/alpha/watchers"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .mount(&server)
        .await;

    let mut discoverer = bitbucket(&server);
    let before = discoverer.cursor().to_string();
    let started = chrono::Utc::now().timestamp();
    let err = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        DiscoveryError::RateLimited { reset_at } => assert!(reset_at > started),
        other => panic!("expected rate limit, got {:?}", other),
    }
    // The page is fetched again once the quota resets.
    assert_eq!(discoverer.cursor(), before);
}

#[tokio::test]
async fn test_bitbucket_follows_next_past_page_without_git() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repositories"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{
                "full_name": "team/fresh",
                "scm": "git",
                "links": {"html": {"href": "https://bitbucket.org/team/fresh"}}
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories"))
        .and(query_param("pagelen", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{
                "full_name": "team/legacy",
                "scm": "hg",
                "links": {"html": {"href": "https://bitbucket.org/team/legacy"}}
            }],
            "next": format!("{}/repositories?page=2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut discoverer = bitbucket(&server);
    let batch = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    let names: Vec<&str> = batch.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["team/fresh"]);
    assert_eq!(discoverer.cursor(), format!("{}/repositories", server.uri()));
}

#[tokio::test]
async fn test_github_follows_next_past_page_of_forks() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repositories"))
        .and(query_param("since", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 3, "full_name": "octo/real", "html_url": "https://github.com/octo/real"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "full_name": "octo/copy-a", "html_url": "https://github.com/octo/copy-a", "fork": true},
            {"id": 2, "full_name": "octo/copy-b", "html_url": "https://github.com/octo/copy-b", "fork": true}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let mut discoverer = github(&server);
    let batch = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].name, "octo/real");
    assert_eq!(batch[0].rank, 0.5);
    assert_eq!(
        discoverer.cursor(),
        format!("{}/repositories?since=3", server.uri())
    );
}

#[tokio::test]
async fn test_github_empty_listing_is_caught_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let mut discoverer = github(&server);
    let batch = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert!(batch.is_empty());
}

#[tokio::test]
async fn test_github_malformed_listing_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let mut discoverer = github(&server);
    let before = discoverer.cursor().to_string();
    let err = discoverer
        .produce(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DiscoveryError::Decode(_)));
    assert!(!err.is_transient());
    assert_eq!(discoverer.cursor(), before);
}

#[tokio::test]
async fn test_seed_discoverer_falls_back_to_configured_default_rank() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = GitHubConfig {
        api_url: server.uri(),
        ..GitHubConfig::default()
    };
    let mut seed = SeedDiscoverer::new(
        vec!["rust-lang/rust".to_string()],
        GitHubDiscoverer::new(client(), &config, 0.25),
    );

    let batch = seed.produce(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].rank, 0.25);
}
