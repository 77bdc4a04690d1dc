use issuelens_index::{GraphRetriever, GraphSchema, IndexError, RetrievalOptions};
use issuelens_llm::any::AnyEmbedder;
use issuelens_llm::mock::MockEmbedder;
use neo4rs::{Graph, query};
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{GenericImage, ImageExt};

const BOLT_PORT: ContainerPort = ContainerPort::Tcp(7687);
const PASSWORD: &str = "issuelens-test";
const QUERY: &str = "how do widgets build?\nwith make!";

fn neo4j_image() -> testcontainers::ContainerRequest<GenericImage> {
    GenericImage::new("neo4j", "5.26")
        .with_wait_for(WaitFor::message_on_stdout("Started."))
        .with_exposed_port(BOLT_PORT)
        .with_env_var("NEO4J_AUTH", format!("neo4j/{PASSWORD}"))
}

async fn create_indexes(graph: &Graph) {
    let statements = [
        "CREATE VECTOR INDEX `vector` IF NOT EXISTS FOR (n:Chunk) ON (n.embedding) \
         OPTIONS {indexConfig: {`vector.dimensions`: 4, `vector.similarity_function`: 'cosine'}}",
        "CREATE VECTOR INDEX `issue_vector` IF NOT EXISTS FOR (n:Issue) ON (n.embedding) \
         OPTIONS {indexConfig: {`vector.dimensions`: 4, `vector.similarity_function`: 'cosine'}}",
        "CREATE FULLTEXT INDEX `keyword` IF NOT EXISTS FOR (n:Chunk) ON EACH [n.text]",
    ];
    for cypher in statements {
        graph.run(query(cypher)).await.unwrap();
    }
    graph.run(query("CALL db.awaitIndexes(60)")).await.unwrap();
}

async fn seed_chunk(graph: &Graph, branch: &str, path: &str, text: &str, embedding: [f64; 4]) {
    graph
        .run(
            query(
                "CREATE (:Chunk {source: $source, text: $text, branch: $branch, url: $url, \
                 embedding: $embedding})",
            )
            .param("source", format!("{branch}@{path}"))
            .param("text", text)
            .param("branch", branch)
            .param("url", format!("https://github.com/acme/widgets/blob/{branch}/{path}"))
            .param("embedding", embedding.to_vec()),
        )
        .await
        .unwrap();
}

async fn seed_issue(graph: &Graph, id: &str, title: &str, embedding: [f64; 4]) {
    graph
        .run(
            query(
                "CREATE (:Issue {id: $id, title: $title, state: 'open', content: $title, \
                 url: $url, embedding: $embedding})",
            )
            .param("id", id)
            .param("title", title)
            .param("url", format!("https://github.com/acme/widgets/issues/{id}"))
            .param("embedding", embedding.to_vec()),
        )
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn hybrid_search_fuses_filters_and_lists_issues() {
    let container = neo4j_image().start().await.unwrap();
    let port = container.get_host_port_ipv4(7687).await.unwrap();
    let uri = format!("127.0.0.1:{port}");

    let graph = Graph::new(&uri, "neo4j", PASSWORD).await.unwrap();
    create_indexes(&graph).await;

    let retriever = GraphRetriever::connect(&uri, "neo4j", PASSWORD, None, GraphSchema::default())
        .await
        .unwrap();
    retriever.verify_connectivity().await.unwrap();

    let embedder = AnyEmbedder::Mock(MockEmbedder::new(4).with_vector(QUERY, vec![1.0, 0.0, 0.0, 0.0]));
    let embed = embedder.embed_fn();

    let empty = retriever
        .retrieve(QUERY, &embed, &RetrievalOptions::default())
        .await;
    assert!(matches!(empty, Err(IndexError::NotFound(_))), "{empty:?}");

    seed_chunk(&graph, "main", "README.md", "widgets build with make", [1.0, 0.0, 0.0, 0.0]).await;
    seed_chunk(&graph, "main", "src/lib.rs", "pub fn widget() {}", [0.6, 0.8, 0.0, 0.0]).await;
    seed_chunk(&graph, "dev", "README.md", "widgets build with cargo", [0.8, 0.6, 0.0, 0.0]).await;
    seed_chunk(&graph, "dev", "NOTES.md", "release notes", [0.0, 0.0, 1.0, 0.0]).await;
    graph.run(query("CALL db.awaitIndexes(60)")).await.unwrap();

    let docs = retriever
        .retrieve(QUERY, &embed, &RetrievalOptions::default())
        .await
        .unwrap();
    assert!(!docs.is_empty() && docs.len() <= 5);
    assert!((docs[0].score - 1.0).abs() < 1e-9, "{docs:?}");
    assert!(docs.iter().all(|d| (0.0..=1.0).contains(&d.score)));
    assert!(docs.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(docs[0].id, "main@README.md");

    let dev = retriever
        .retrieve(QUERY, &embed, &RetrievalOptions::default().branches(vec!["dev".into()]))
        .await
        .unwrap();
    assert!(!dev.is_empty());
    assert!(dev.iter().all(|d| d.branch == "dev"), "{dev:?}");

    let by_vector = retriever
        .retrieve_by_vector(vec![0.0, 0.0, 1.0, 0.0], &RetrievalOptions::default().top_k(2))
        .await
        .unwrap();
    assert_eq!(by_vector.len(), 2);
    assert_eq!(by_vector[0].id, "dev@NOTES.md");
    assert!((by_vector[0].score - 1.0).abs() < 1e-9);

    let no_issues = retriever
        .retrieve_issue(vec![1.0, 0.0, 0.0, 0.0], None, &RetrievalOptions::default())
        .await;
    assert!(matches!(no_issues, Err(IndexError::NotFound(_))));

    seed_issue(&graph, "1", "Build fails", [1.0, 0.0, 0.0, 0.0]).await;
    seed_issue(&graph, "2", "Make target missing", [0.9, 0.1, 0.0, 0.0]).await;
    seed_issue(&graph, "3", "Docs typo", [0.0, 1.0, 0.0, 0.0]).await;
    seed_issue(&graph, "4", "Crash on start", [0.0, 0.0, 1.0, 0.0]).await;
    seed_issue(&graph, "5", "Slow build", [0.7, 0.7, 0.0, 0.0]).await;
    graph.run(query("CALL db.awaitIndexes(60)")).await.unwrap();

    let markdown = retriever
        .retrieve_issue(vec![1.0, 0.0, 0.0, 0.0], Some(1), &RetrievalOptions::default())
        .await
        .unwrap();
    assert!(markdown.starts_with("## Other issues similar to this one are:"));
    assert!(!markdown.contains("#1 "));
    assert_eq!(markdown.lines().filter(|l| l.starts_with(char::is_numeric)).count(), 3);
    assert!(markdown.contains("1. [Make target missing #2 (open)]"));

    retriever.close();
}
