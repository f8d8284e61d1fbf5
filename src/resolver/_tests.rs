use std::sync::Arc;

use serde_json::{json, Value};

use crate::executor::{CapturingExecutor, MemoryExecutor};
use crate::resolver::{
    ConnectionArgs, EquiJoin, ProvidedJoin, ResolverError, ResolverFactory, ResolverOptions,
    ResolverTree, UnionJoin,
};

pub mod fixtures {
    use super::*;

    pub fn people_db() -> Arc<MemoryExecutor> {
        let executor = Arc::new(MemoryExecutor::new());
        executor.load(
            "person",
            json!([
                { "id": 1, "name": "Alice", "team_id": 7 },
                { "id": 2, "name": "Bruno", "team_id": 7 },
                { "id": 3, "name": "Carla", "team_id": 8 },
            ]),
        );
        executor.load(
            "pet",
            json!([
                { "id": 10, "name": "Rex",  "owner_id": 1 },
                { "id": 11, "name": "Fido", "owner_id": 1 },
                { "id": 12, "name": "Momo", "owner_id": 1 },
                { "id": 13, "name": "Pip",  "owner_id": 3 },
            ]),
        );
        executor.load(
            "cat",
            json!([
                { "person_id": 1, "name": "Whiskers" },
                { "person_id": 3, "name": "Paws" },
            ]),
        );
        executor.load(
            "dog",
            json!([
                { "person_id": 2, "name": "Bolt" },
                { "person_id": 3, "name": "Rocket" },
            ]),
        );
        executor
    }

    pub fn factory(executor: Arc<MemoryExecutor>) -> ResolverFactory {
        ResolverFactory::new(executor, ResolverOptions::default())
    }
}

fn plan_person_pets(args: ConnectionArgs) -> (ResolverTree, crate::resolver::ResolverId) {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    let join = EquiJoin::new("pet", &["owner_id"], &["id"]);
    let conn = tree.add_connection_field(root, "pets", join, args).unwrap();
    (tree, conn)
}

#[tokio::test]
async fn resolves_nested_connection_nodes() {
    let (mut tree, conn) = plan_person_pets(ConnectionArgs::first(1));
    let root = tree.root();
    tree.add_where(root, crate::sql::SqlCond::Eq { column: "person.id".into(), value: json!(1) })
        .unwrap();
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();

    let results = tree.execute().await.unwrap();
    assert_eq!(results, vec![json!({ "id": 1, "pets": { "nodes": [{ "name": "Rex" }] } })]);

    // the over-fetched row is visible as a next page on the pets result
    let map = tree.fetch().await.unwrap();
    let parent = results[0].as_object().unwrap();
    let mut parent_row = crate::resolver::Row::new();
    parent_row.insert("id".to_string(), parent["id"].clone());
    let pets = map.result_for(nodes, Some(&parent_row)).unwrap();
    assert!(pets.has_next_page);
    assert!(!pets.has_previous_page);
}

#[tokio::test]
async fn connection_shape_with_page_info_and_total_count() {
    let (mut tree, conn) = plan_person_pets(ConnectionArgs::first(2));
    let root = tree.root();
    tree.add_where(root, crate::sql::SqlCond::Eq { column: "person.id".into(), value: json!(1) })
        .unwrap();
    tree.add_order_by(tree.node_resolver(conn).unwrap(), "name", None, false).unwrap();
    let edges = tree.add_edges(conn, "edges").unwrap();
    tree.add_cursor(edges, "cursor").unwrap();
    let node = tree.add_node(edges, "node").unwrap();
    tree.add_column_field(node, "name", "name", None).unwrap();
    let page_info = tree.add_page_info(conn, "pageInfo").unwrap();
    tree.add_has_previous_page(page_info, "hasPreviousPage");
    tree.add_has_next_page(page_info, "hasNextPage");
    tree.add_start_cursor(page_info, "startCursor").unwrap();
    tree.add_end_cursor(page_info, "endCursor").unwrap();
    tree.add_connection_total_count(conn, "totalCount").unwrap();

    let results = tree.execute().await.unwrap();
    let pets = &results[0]["pets"];

    let edges = pets["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0]["node"]["name"], json!("Fido"));
    assert_eq!(edges[1]["node"]["name"], json!("Momo"));

    let info = pets["pageInfo"].as_object().unwrap();
    assert_eq!(info["hasPreviousPage"], json!(false));
    assert_eq!(info["hasNextPage"], json!(true));
    assert_eq!(info["startCursor"], edges[0]["cursor"]);
    assert_eq!(info["endCursor"], edges[1]["cursor"]);

    // three pets total, only two fetched
    assert_eq!(pets["totalCount"], json!(3));

    let decoded = crate::resolver::decode_cursor(edges[0]["cursor"].as_str().unwrap()).unwrap();
    assert_eq!(decoded.get("name"), Some(&json!("Fido")));
}

#[tokio::test]
async fn empty_groups_resolve_to_tagged_empty_connections() {
    let (mut tree, conn) = plan_person_pets(ConnectionArgs::first(2));
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();
    tree.add_connection_total_count(conn, "totalCount").unwrap();

    let results = tree.execute().await.unwrap();
    // Bruno has no pets
    let bruno = results.iter().find(|person| person["id"] == json!(2)).unwrap();
    assert_eq!(bruno["pets"]["nodes"], json!([]));
    assert_eq!(bruno["pets"]["totalCount"], json!(0));
    assert_eq!(bruno["pets"]["__emptyConnection"], json!(true));

    let alice = results.iter().find(|person| person["id"] == json!(1)).unwrap();
    assert!(alice["pets"].as_object().unwrap().get("__emptyConnection").is_none());
}

#[tokio::test]
async fn backward_paging_returns_tail_in_forward_order() {
    let (mut tree, conn) = plan_person_pets(ConnectionArgs::last(1));
    let root = tree.root();
    tree.add_where(root, crate::sql::SqlCond::Eq { column: "person.id".into(), value: json!(1) })
        .unwrap();
    let node = tree.node_resolver(conn).unwrap();
    tree.add_order_by(node, "name", None, false).unwrap();
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();
    let page_info = tree.add_page_info(conn, "pageInfo").unwrap();
    tree.add_has_previous_page(page_info, "hasPreviousPage");
    tree.add_has_next_page(page_info, "hasNextPage");

    let results = tree.execute().await.unwrap();
    let pets = &results[0]["pets"];
    // reverse order fetches Rex, Momo, ... but only the last page survives
    assert_eq!(pets["nodes"], json!([{ "name": "Rex" }]));
    assert_eq!(pets["pageInfo"]["hasPreviousPage"], json!(true));
    assert_eq!(pets["pageInfo"]["hasNextPage"], json!(false));
}

#[tokio::test]
async fn batched_child_fetch_issues_one_query_with_distinct_keys() {
    let executor = Arc::new(CapturingExecutor::new());
    let factory = ResolverFactory::new(executor.clone(), ResolverOptions::default());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "teamId", "team_id", None).unwrap();
    let join = EquiJoin::new("member", &["team_id"], &["team_id"]);
    let child = tree.add_object_list_field(root, "members", vec![join]).unwrap();
    tree.add_column_field(child, "name", "name", None).unwrap();

    // three parents share team 7; 8 and 9 are distinct; 9 has no members
    executor.queue(json!([
        { "team_id": 7 }, { "team_id": 7 }, { "team_id": 7 },
        { "team_id": 8 }, { "team_id": 9 },
    ]));
    executor.queue(json!([
        { "team_id": 7, "name": "Ana" },
        { "team_id": 7, "name": "Bea" },
        { "team_id": 8, "name": "Cid" },
    ]));

    let results = tree.execute().await.unwrap();
    assert_eq!(executor.query_count(), 2);

    let (child_sql, child_bindings) = executor.queries().remove(1);
    assert!(child_sql.contains("where member.team_id in (?, ?, ?)"), "got: {child_sql}");
    assert_eq!(child_bindings, vec![json!(7), json!(8), json!(9)]);

    assert_eq!(results[0]["members"], json!([{ "name": "Ana" }, { "name": "Bea" }]));
    assert_eq!(results[3]["members"], json!([{ "name": "Cid" }]));
    assert_eq!(results[4]["members"], json!([]));

    // the empty group still resolves, with a zero count
    let map = tree.fetch().await.unwrap();
    let mut orphan = crate::resolver::Row::new();
    orphan.insert("teamId".to_string(), json!(9));
    orphan.insert("team_id".to_string(), json!(9));
    let result = map.result_for(child, Some(&orphan)).unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(result.total_count, Some(0));
}

#[tokio::test]
async fn fetch_filters_disable_sql_side_group_limiting() {
    let executor = Arc::new(CapturingExecutor::new());
    let factory = ResolverFactory::new(executor.clone(), ResolverOptions::default());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    let join = EquiJoin::new("pet", &["owner_id"], &["id"]);
    let conn = tree.add_connection_field(root, "pets", join, ConnectionArgs::first(1)).unwrap();
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();
    tree.add_fetch_filter(
        nodes,
        Arc::new(|rows| rows.into_iter().filter(|row| row.get("name").is_some()).collect()),
    )
    .unwrap();

    executor.queue(json!([{ "id": 1 }]));
    executor.queue(json!([]));
    tree.execute().await.unwrap();

    let (child_sql, _) = executor.queries().remove(1);
    assert!(!child_sql.contains("partition_row"), "got: {child_sql}");
}

#[tokio::test]
async fn windowed_group_limit_is_applied_without_filters() {
    let executor = Arc::new(CapturingExecutor::new());
    let factory = ResolverFactory::new(executor.clone(), ResolverOptions::default());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    let join = EquiJoin::new("pet", &["owner_id"], &["id"]);
    let conn = tree.add_connection_field(root, "pets", join, ConnectionArgs::first(1)).unwrap();
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();

    executor.queue(json!([{ "id": 1 }]));
    executor.queue(json!([]));
    tree.execute().await.unwrap();

    let (child_sql, _) = executor.queries().remove(1);
    assert!(
        child_sql.contains("row_number() over (partition by pet.owner_id"),
        "got: {child_sql}"
    );
    assert!(child_sql.contains("where partition_row <= 2"), "got: {child_sql}");
}

#[tokio::test]
async fn multi_join_child_list_chains_to_the_last_table() {
    let executor = Arc::new(CapturingExecutor::new());
    let factory = ResolverFactory::new(executor.clone(), ResolverOptions::default());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    let joins = vec![
        EquiJoin::new("pet", &["owner_id"], &["id"]),
        EquiJoin::new("toy", &["pet_id"], &["id"]).with_from_table("pet"),
    ];
    let child = tree.add_object_list_field(root, "toys", joins).unwrap();
    // fields resolve against the chain's last table
    tree.add_column_field(child, "name", "name", None).unwrap();

    executor.queue(json!([{ "id": 1 }]));
    executor.queue(json!([{ "owner_id": 1, "name": "Ball" }]));
    let results = tree.execute().await.unwrap();

    let (child_sql, _) = executor.queries().remove(1);
    assert!(child_sql.contains("from pet"), "got: {child_sql}");
    assert!(child_sql.contains("left join toy on toy.pet_id = pet.id"), "got: {child_sql}");
    assert!(child_sql.contains("toy.name"), "got: {child_sql}");
    assert_eq!(results[0]["toys"], json!([{ "name": "Ball" }]));
}

#[tokio::test]
async fn union_field_reports_last_matching_branch() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    let union = tree
        .add_union_field(
            root,
            "animal",
            vec![
                UnionJoin::new(EquiJoin::new("cat", &["person_id"], &["id"]), "Cat"),
                UnionJoin::new(EquiJoin::new("dog", &["person_id"], &["id"]), "Dog"),
            ],
        )
        .unwrap();
    tree.add_union_column_field(union, "name", "name", None).unwrap();

    let results = tree.execute().await.unwrap();
    assert_eq!(results[0]["animal"]["__typename"], json!("Cat"));
    assert_eq!(results[0]["animal"]["name"], json!("Whiskers"));
    assert_eq!(results[1]["animal"]["__typename"], json!("Dog"));
    assert_eq!(results[1]["animal"]["name"], json!("Bolt"));
    // both branches present: the later branch wins the type, the coalesce
    // still takes the first non-null name
    assert_eq!(results[2]["animal"]["__typename"], json!("Dog"));
    assert_eq!(results[2]["animal"]["name"], json!("Paws"));
}

#[tokio::test]
async fn object_field_joining_back_reads_the_ancestor_row() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "name", "name", None).unwrap();
    tree.add_where(root, crate::sql::SqlCond::Eq { column: "person.id".into(), value: json!(1) })
        .unwrap();
    let join = EquiJoin::new("pet", &["owner_id"], &["id"]);
    let pets = tree.add_object_list_field(root, "pets", vec![join]).unwrap();
    tree.add_column_field(pets, "name", "name", None).unwrap();

    let back = EquiJoin::new("person", &["id"], &["owner_id"]);
    let owner = tree.add_object_field(pets, "owner", Some(back.into())).unwrap();
    tree.add_column_field(owner, "name", "name", None).unwrap();

    // no join was registered on the child query for the back-reference
    assert!(tree.query_state(pets).unwrap().join_tables.is_empty());

    let results = tree.execute().await.unwrap();
    let pets = results[0]["pets"].as_array().unwrap();
    assert_eq!(pets.len(), 3);
    for pet in pets {
        assert_eq!(pet["owner"], json!({ "name": "Alice" }));
    }
}

#[tokio::test]
async fn object_field_with_join_is_null_when_test_column_is_null() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    let join = EquiJoin::new("cat", &["person_id"], &["id"]);
    let cat = tree.add_object_field(root, "cat", Some(join.into())).unwrap();
    tree.add_column_field(cat, "name", "name", None).unwrap();

    let results = tree.execute().await.unwrap();
    assert_eq!(results[0]["cat"], json!({ "name": "Whiskers" }));
    assert_eq!(results[1]["cat"], Value::Null);
}

#[test]
fn equivalent_joins_share_one_alias() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();

    let join = EquiJoin::new("pet", &["owner_id"], &["id"]);
    let first = tree.add_table(root, join.clone()).unwrap();
    let second = tree.add_table(root, join.clone()).unwrap();
    assert_eq!(first, "pet");
    assert_eq!(second, "pet");
    assert_eq!(tree.query_state(root).unwrap().join_tables.len(), 1);

    // a non-equivalent join probing the same alias gets the next slot
    let restricted = join.restrict_to(crate::sql::ColumnRestriction::eq("name", json!("Rex")));
    let object = tree.add_object_field(root, "rex", Some(restricted.into())).unwrap();
    let alias = tree.find_table_alias(object, "pet").unwrap();
    assert_eq!(alias, "rex_pet");
    assert_eq!(tree.query_state(root).unwrap().join_tables.len(), 2);
}

#[test]
fn conflicting_provided_join_is_a_planning_error() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();

    let equi = EquiJoin::new("pet", &["owner_id"], &["id"]).with_to_alias("friend");
    tree.add_table(root, equi).unwrap();
    let err = tree.add_table(root, ProvidedJoin::new("friend")).unwrap_err();
    assert!(matches!(err, ResolverError::ConflictingProvidedJoin(alias) if alias == "friend"));

    // re-registering an equivalent provided join is idempotent
    tree.add_table(root, ProvidedJoin::new("other")).unwrap();
    tree.add_table(root, ProvidedJoin::new("other")).unwrap();
}

#[tokio::test]
async fn conflicting_field_sources_fail_assembly() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    tree.add_constant_field(root, "id", json!(999));

    let err = tree.execute().await.unwrap_err();
    match err {
        ResolverError::ConflictingFieldValues { field, .. } => assert_eq!(field, "id"),
        other => panic!("expected conflict, got {other}"),
    }
}

#[tokio::test]
async fn agreeing_field_sources_merge() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "id", "id", None).unwrap();
    tree.add_derived_field(root, "id", Arc::new(|row| row.get("id").cloned().unwrap_or(Value::Null)));

    let results = tree.execute().await.unwrap();
    assert_eq!(results[0]["id"], json!(1));
}

#[tokio::test]
async fn negative_page_arguments_reach_the_caller() {
    let factory = fixtures::factory(fixtures::people_db());
    let tree = factory.create_query("person", ConnectionArgs::first(-1));
    let err = tree.execute().await.unwrap_err();
    assert!(matches!(err, ResolverError::UserInput(_)));
}

#[tokio::test]
async fn lookup_fetches_a_single_object() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_query("person", ConnectionArgs::default());
    let root = tree.root();
    tree.add_column_field(root, "name", "name", None).unwrap();
    tree.add_where(root, crate::sql::SqlCond::Eq { column: "person.id".into(), value: json!(2) })
        .unwrap();

    let result = tree.execute_lookup().await.unwrap();
    assert_eq!(result, Some(json!({ "name": "Bruno" })));
}

#[tokio::test]
async fn root_connection_executes_to_a_connection_object() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_connection("person", ConnectionArgs::first(2));
    let conn = tree.root();
    let node = tree.node_resolver(conn).unwrap();
    tree.add_order_by(node, "name", None, false).unwrap();
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();
    let page_info = tree.add_page_info(conn, "pageInfo").unwrap();
    tree.add_has_next_page(page_info, "hasNextPage");
    tree.add_connection_total_count(conn, "totalCount").unwrap();

    let result = tree.execute_connection().await.unwrap();
    assert_eq!(result["nodes"], json!([{ "name": "Alice" }, { "name": "Bruno" }]));
    assert_eq!(result["pageInfo"]["hasNextPage"], json!(true));
    assert_eq!(result["totalCount"], json!(3));
}

#[tokio::test]
async fn search_seeded_connection_preserves_the_given_order() {
    let factory = fixtures::factory(fixtures::people_db());
    let mut tree = factory.create_connection("person", ConnectionArgs::default());
    let conn = tree.root();
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();
    tree.add_connection_total_count(conn, "totalCount").unwrap();

    let result = tree
        .execute_connection_from_search("id", vec![json!(3), json!(1)], Some(42), None)
        .await
        .unwrap();
    assert_eq!(result["nodes"], json!([{ "name": "Carla" }, { "name": "Alice" }]));
    assert_eq!(result["totalCount"], json!(42));
}

#[tokio::test]
async fn first_and_last_combine_to_both_bounds() {
    let (mut tree, conn) = plan_person_pets(ConnectionArgs {
        first: Some(2),
        last: Some(1),
        ..ConnectionArgs::default()
    });
    let root = tree.root();
    tree.add_where(root, crate::sql::SqlCond::Eq { column: "person.id".into(), value: json!(1) })
        .unwrap();
    let node = tree.node_resolver(conn).unwrap();
    tree.add_order_by(node, "name", None, false).unwrap();
    let nodes = tree.add_nodes(conn, "nodes").unwrap();
    tree.add_column_field(nodes, "name", "name", None).unwrap();

    let results = tree.execute().await.unwrap();
    // first:2 keeps [Fido, Momo], last:1 keeps the tail of that page
    assert_eq!(results[0]["pets"]["nodes"], json!([{ "name": "Momo" }]));
}
