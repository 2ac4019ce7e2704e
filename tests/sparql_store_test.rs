//! End-to-end tests: SPARQL text in, result envelope and diagnostics out,
//! over SQLite.

use regex::Regex;
use sparqlstore::{QueryType, RdfStore, ResultRow, SqliteAdapter, StoreConfig};

const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn store() -> RdfStore<SqliteAdapter> {
    init_tracing();
    RdfStore::open_in_memory(StoreConfig::default().with_base_iri("http://example.com/base")).unwrap()
}

fn rows(store: &mut RdfStore<SqliteAdapter>, query: &str) -> Vec<ResultRow> {
    let envelope = store.query(query);
    assert!(store.errors().is_empty(), "unexpected errors: {:?}", store.errors());
    envelope.rows()
}

fn inserted(store: &mut RdfStore<SqliteAdapter>, query: &str) -> u64 {
    let envelope = store.query(query);
    assert_eq!(envelope.query_type, QueryType::Insert);
    envelope.result.t_count().unwrap()
}

#[test]
fn test_round_trip_with_relative_iri() {
    let mut store = store();
    assert_eq!(
        inserted(&mut store, "INSERT INTO <http://example.com/g> { <#make> <http://ex/p> <http://ex/o> . }"),
        1
    );

    let rows = rows(&mut store, "SELECT ?s ?p ?o WHERE { ?s ?p ?o }");
    assert_eq!(rows.len(), 1);
    let flat = rows[0].to_flat_map();
    assert_eq!(flat["s"], "http://example.com/base#make");
    assert_eq!(flat["s type"], "uri");
    assert_eq!(flat["p"], "http://ex/p");
    assert_eq!(flat["o"], "http://ex/o");
    assert_eq!(flat["o type"], "uri");
}

#[test]
fn test_idempotent_insert() {
    let mut store = store();
    let query = "INSERT DATA { <http://ex/s> <http://ex/p> \"v\"@en }";
    assert_eq!(inserted(&mut store, query), 1);
    assert_eq!(inserted(&mut store, query), 0);
    assert_eq!(rows(&mut store, "SELECT ?o WHERE { ?s ?p ?o }").len(), 1);
}

#[test]
fn test_unused_variable_policy() {
    let mut store = store();
    inserted(&mut store, "INSERT DATA { <http://ex/s> <http://ex/p> <http://ex/o> }");

    let envelope = store.query("SELECT ?unused ?s WHERE { ?s ?p ?o }");
    assert_eq!(envelope.query_type, QueryType::Select);
    assert_eq!(envelope.variables(), ["unused", "s"]);
    assert!(envelope.rows().is_empty());
    assert_eq!(
        store.warnings(),
        ["Result variable \"unused\" not used in query. via SelectQueryHandler"]
    );
    assert_eq!(store.errors().len(), 1);
    assert!(store.errors()[0].ends_with(" via SelectQueryHandler"));
}

#[test]
fn test_literal_typing() {
    let mut store = store();
    inserted(
        &mut store,
        r#"PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>
           INSERT INTO <http://ex/g> {
             <http://ex/s> <http://ex/plain> "3" ;
                           <http://ex/typed> "4"^^xsd:integer ;
                           <http://ex/int> 1 ;
                           <http://ex/dec> 2.0 ;
                           <http://ex/lang> "5"@en .
           }"#,
    );

    let lookup = |store: &mut RdfStore<SqliteAdapter>, p: &str| {
        let rows = rows(store, &format!("SELECT ?o WHERE {{ <http://ex/s> <http://ex/{}> ?o }}", p));
        assert_eq!(rows.len(), 1);
        rows[0].to_flat_map()
    };

    let plain = lookup(&mut store, "plain");
    assert_eq!(plain["o"], "3");
    assert_eq!(plain["o type"], "literal");
    assert!(!plain.contains_key("o datatype"));
    assert!(!plain.contains_key("o lang"));

    assert_eq!(lookup(&mut store, "typed")["o datatype"], XSD_INTEGER);
    assert_eq!(lookup(&mut store, "int")["o datatype"], XSD_INTEGER);
    assert_eq!(lookup(&mut store, "dec")["o datatype"], XSD_DECIMAL);

    let lang = lookup(&mut store, "lang");
    assert_eq!(lang["o lang"], "en");
    assert!(!lang.contains_key("o datatype"));
}

#[test]
fn test_blank_node_shorthand() {
    let mut store = store();
    assert_eq!(
        inserted(&mut store, "INSERT DATA { <http://ex/s> <http://ex/p> [ <http://ex/p2> <http://ex/o2> ] }"),
        2
    );

    let outer = rows(&mut store, "SELECT ?b WHERE { <http://ex/s> <http://ex/p> ?b }");
    let inner = rows(&mut store, "SELECT ?b WHERE { ?b <http://ex/p2> <http://ex/o2> }");
    assert_eq!(outer.len(), 1);
    assert_eq!(inner.len(), 1);

    let id = Regex::new(r"^_:[a-z0-9]+_[a-z0-9]+$").unwrap();
    let flat = outer[0].to_flat_map();
    assert_eq!(flat["b type"], "bnode");
    assert!(id.is_match(&flat["b"]), "unexpected blank node id {}", flat["b"]);
    assert_eq!(outer[0].value("b"), inner[0].value("b"));

    // the blank node joins like a variable
    let joined = rows(
        &mut store,
        "SELECT ?o WHERE { <http://ex/s> <http://ex/p> _:x . _:x <http://ex/p2> ?o }",
    );
    assert_eq!(joined[0].value("o").as_deref(), Some("http://ex/o2"));
}

#[test]
fn test_object_list_shorthand() {
    let mut store = store();
    assert_eq!(inserted(&mut store, "INSERT DATA { <http://ex/s> <http://ex/p> 1, 2, 3 }"), 3);

    let rows = rows(&mut store, "SELECT ?s ?o WHERE { ?s <http://ex/p> ?o } ORDER BY ?o");
    let values: Vec<String> = rows.iter().filter_map(|r| r.value("o")).collect();
    assert_eq!(values, ["1", "2", "3"]);
    for row in &rows {
        let flat = row.to_flat_map();
        assert_eq!(flat["s"], "http://ex/s");
        assert_eq!(flat["o datatype"], XSD_INTEGER);
    }
}

#[test]
fn test_collection_shorthand() {
    let mut store = store();
    // one link triple plus a first/rest pair per element
    assert_eq!(inserted(&mut store, "INSERT DATA { <http://ex/s> <http://ex/list> (1 2 3) }"), 7);

    let rows = rows(
        &mut store,
        "PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
         SELECT ?x WHERE { ?cell rdf:first ?x }",
    );
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.to_flat_map()["x datatype"] == XSD_INTEGER));

    let tail = self::rows(
        &mut store,
        "PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
         SELECT ?cell WHERE { ?cell rdf:rest rdf:nil }",
    );
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].to_flat_map()["cell type"], "bnode");
}

#[test]
fn test_insert_where_is_gated_by_solutions() {
    let mut store = store();
    let insert = "INSERT INTO <http://ex/g> CONSTRUCT { ?s <http://ex/seen> \"yes\" } \
                  WHERE { ?s <http://ex/kind> <http://ex/Thing> }";

    assert_eq!(inserted(&mut store, insert), 0);
    assert!(rows(&mut store, "SELECT ?s WHERE { ?s <http://ex/seen> ?o }").is_empty());

    inserted(&mut store, "INSERT DATA { <http://ex/a> <http://ex/kind> <http://ex/Thing> }");
    assert_eq!(inserted(&mut store, insert), 1);
    let seen = rows(&mut store, "SELECT ?s WHERE { ?s <http://ex/seen> \"yes\" }");
    assert_eq!(seen[0].value("s").as_deref(), Some("http://ex/a"));
}

#[test]
fn test_diagnostics_accumulate() {
    let mut store = store();
    store.query("SELECT ?x WHERE { ?x ");
    store.query("SELECT ?x WHERE { ?x undeclared:p ?y }");
    assert_eq!(store.errors().len(), 2);
    assert!(store.errors().iter().all(|e| e.ends_with(" via SparqlParser")));
    assert!(store.errors()[1].contains("undeclared"));

    store.clear_diagnostics();
    assert!(store.errors().is_empty());
}

#[test]
fn test_data_triples_with_variables_are_skipped() {
    let mut store = store();
    let count = store
        .query("INSERT DATA { <http://ex/s> <http://ex/p> ?o . <http://ex/s> <http://ex/p> <http://ex/o> }")
        .result
        .t_count();
    assert_eq!(count, Some(1));
    assert_eq!(store.warnings().len(), 1);
    assert!(store.warnings()[0].ends_with(" via InsertQueryHandler"));
}

#[test]
fn test_delete_forms() {
    let mut store = store();
    inserted(
        &mut store,
        "INSERT INTO <http://ex/g1> { <http://ex/a> <http://ex/p> 1 . <http://ex/b> <http://ex/p> 2 . \
         <http://ex/c> <http://ex/q> 3 }",
    );
    inserted(&mut store, "INSERT INTO <http://ex/g2> { <http://ex/d> <http://ex/p> 4 }");

    let deleted = |store: &mut RdfStore<SqliteAdapter>, q: &str| {
        let envelope = store.query(q);
        assert_eq!(envelope.query_type, QueryType::Delete);
        assert!(store.errors().is_empty(), "{:?}", store.errors());
        envelope.result.t_count().unwrap()
    };

    assert_eq!(deleted(&mut store, "DELETE DATA { <http://ex/a> <http://ex/p> 1 }"), 1);
    assert_eq!(deleted(&mut store, "DELETE DATA { <http://ex/a> <http://ex/p> 1 }"), 0);
    assert_eq!(
        deleted(&mut store, "DELETE { ?s <http://ex/p> ?o } WHERE { ?s <http://ex/p> ?o FILTER(?o > 3) }"),
        1
    );
    assert_eq!(deleted(&mut store, "DELETE FROM <http://ex/g2> { <http://ex/b> <http://ex/p> 2 }"), 0);
    assert_eq!(deleted(&mut store, "DELETE FROM <http://ex/g1>"), 2);
    assert!(rows(&mut store, "SELECT ?s WHERE { ?s ?p ?o }").is_empty());

    store.query("DELETE { }");
    assert_eq!(store.errors().len(), 1);
    assert!(store.errors()[0].ends_with(" via DeleteQueryHandler"));
}

#[test]
fn test_delete_where() {
    let mut store = store();
    inserted(&mut store, "INSERT DATA { <http://ex/a> <http://ex/p> 1 ; <http://ex/q> 2 }");
    let envelope = store.query("DELETE WHERE { ?s <http://ex/p> ?o }");
    assert_eq!(envelope.result.t_count(), Some(1));
    let left = rows(&mut store, "SELECT ?p WHERE { <http://ex/a> ?p ?o }");
    assert_eq!(left[0].value("p").as_deref(), Some("http://ex/q"));
}

#[test]
fn test_construct_deduplicates() {
    let mut store = store();
    inserted(
        &mut store,
        "INSERT DATA { <http://ex/a> <http://ex/knows> <http://ex/b> , <http://ex/c> }",
    );
    let envelope = store.query("CONSTRUCT { ?s <http://ex/type> <http://ex/Person> } WHERE { ?s <http://ex/knows> ?o }");
    assert_eq!(envelope.query_type, QueryType::Construct);
    assert_eq!(envelope.result.triples().len(), 1);

    let rows = envelope.rows();
    let flat = rows[0].to_flat_map();
    assert_eq!(flat["s"], "http://ex/a");
    assert_eq!(flat["p"], "http://ex/type");
    assert_eq!(flat["o type"], "uri");

    // nothing was stored
    assert!(self::rows(&mut store, "SELECT ?s WHERE { ?s <http://ex/type> ?o }").is_empty());
}

#[test]
fn test_ask() {
    let mut store = store();
    assert_eq!(store.query("ASK { ?s ?p ?o }").result.boolean(), Some(false));
    inserted(&mut store, "INSERT DATA { <http://ex/a> <http://ex/p> \"x\" }");
    let envelope = store.query("ASK WHERE { <http://ex/a> <http://ex/p> \"x\" }");
    assert_eq!(envelope.query_type, QueryType::Ask);
    assert_eq!(envelope.result.boolean(), Some(true));
    assert_eq!(store.query("ASK { <http://ex/a> <http://ex/p> \"y\" }").result.boolean(), Some(false));
}

#[test]
fn test_optional_union_filter_and_modifiers() {
    let mut store = store();
    inserted(
        &mut store,
        r#"PREFIX ex: <http://ex/>
           INSERT DATA {
             ex:alice ex:name "Alice" ; ex:age 31 ; ex:mail <mailto:alice@ex> .
             ex:bob ex:name "Bob" ; ex:age 25 .
             ex:carol ex:label "Carol" ; ex:age 40 .
           }"#,
    );

    let optional = rows(
        &mut store,
        "PREFIX ex: <http://ex/> SELECT ?name ?mail WHERE { ?p ex:name ?name OPTIONAL { ?p ex:mail ?mail } } ORDER BY ?name",
    );
    assert_eq!(optional.len(), 2);
    assert_eq!(optional[0].value("mail").as_deref(), Some("mailto:alice@ex"));
    assert!(optional[1].get("mail").is_none());

    let union = rows(
        &mut store,
        "PREFIX ex: <http://ex/> SELECT ?n WHERE { { ?p ex:name ?n } UNION { ?p ex:label ?n } } ORDER BY DESC(?n)",
    );
    let names: Vec<String> = union.iter().filter_map(|r| r.value("n")).collect();
    assert_eq!(names, ["Carol", "Bob", "Alice"]);

    let filtered = rows(
        &mut store,
        "PREFIX ex: <http://ex/> SELECT ?p WHERE { ?p ex:age ?age FILTER(?age >= 30 && regex(str(?p), \"ALICE|carol\", \"i\")) } ORDER BY ?age",
    );
    let people: Vec<String> = filtered.iter().filter_map(|r| r.value("p")).collect();
    assert_eq!(people, ["http://ex/alice", "http://ex/carol"]);

    let page = rows(
        &mut store,
        "PREFIX ex: <http://ex/> SELECT ?age WHERE { ?p ex:age ?age } ORDER BY ?age LIMIT 1 OFFSET 1",
    );
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].value("age").as_deref(), Some("31"));

    let distinct = rows(&mut store, "PREFIX ex: <http://ex/> SELECT DISTINCT ?p WHERE { ?p ?prop ?value }");
    assert_eq!(distinct.len(), 3);

    let unbound = rows(
        &mut store,
        "PREFIX ex: <http://ex/> SELECT ?p WHERE { ?p ex:age ?age OPTIONAL { ?p ex:mail ?m } FILTER(!bound(?m)) }",
    );
    assert_eq!(unbound.len(), 2);
}

#[test]
fn test_from_restricts_graphs() {
    let mut store = store();
    inserted(&mut store, "INSERT INTO <http://ex/g1> { <http://ex/a> <http://ex/p> 1 }");
    inserted(&mut store, "INSERT INTO <http://ex/g2> { <http://ex/b> <http://ex/p> 2 }");

    assert_eq!(rows(&mut store, "SELECT ?s WHERE { ?s ?p ?o }").len(), 2);
    let scoped = rows(&mut store, "SELECT ?s FROM <http://ex/g2> WHERE { ?s ?p ?o }");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].value("s").as_deref(), Some("http://ex/b"));
}

#[test]
fn test_failed_query_keeps_envelope_shape() {
    let mut store = store();
    let envelope = store.query("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ");
    assert_eq!(envelope.query_type, QueryType::Construct);
    assert!(envelope.result.triples().is_empty());

    let envelope = store.query("DESCRIBE <http://ex/a>");
    assert_eq!(envelope.query_type, QueryType::Unknown);
    assert_eq!(store.errors().len(), 2);

    let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
    assert_eq!(json["query_type"], "unknown");
    assert!(json["query_time"].as_f64().unwrap() >= 0.0);
}

#[test]
fn test_file_backed_store_keeps_data() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let config = StoreConfig::default().with_table_prefix("kb_");

    {
        let mut store = RdfStore::open(&path, config.clone()).unwrap();
        inserted(&mut store, "INSERT DATA { <http://ex/a> <http://ex/p> \"kept\"@en }");
    }

    let mut store = RdfStore::open(&path, config).unwrap();
    let rows = rows(&mut store, "SELECT ?o WHERE { <http://ex/a> <http://ex/p> ?o }");
    assert_eq!(rows[0].to_flat_map()["o lang"], "en");
    // the dictionary survives, so re-inserting adds nothing
    assert_eq!(inserted(&mut store, "INSERT DATA { <http://ex/a> <http://ex/p> \"kept\"@en }"), 0);
}

#[test]
fn test_config_prefixes_are_available() {
    init_tracing();
    let config = StoreConfig::default().with_prefix("ex", "http://ex/");
    let mut store = RdfStore::open_in_memory(config).unwrap();
    inserted(&mut store, "INSERT DATA { ex:a ex:p ex:b }");
    let rows = rows(&mut store, "SELECT ?o WHERE { <http://ex/a> ex:p ?o }");
    assert_eq!(rows[0].value("o").as_deref(), Some("http://ex/b"));
}

#[test]
fn test_distinct_ignores_hidden_order_columns() {
    let mut store = store();
    inserted(
        &mut store,
        "INSERT DATA { <http://ex/a> <http://ex/age> 1 , 5 . <http://ex/b> <http://ex/age> 3 }",
    );

    let single = rows(&mut store, "SELECT DISTINCT ?s WHERE { ?s <http://ex/age> ?age } ORDER BY ?age");
    let subjects: Vec<_> = single.iter().filter_map(|r| r.value("s")).collect();
    assert_eq!(subjects, ["http://ex/a", "http://ex/b"]);

    // descending order uses each subject's largest age
    let single = rows(&mut store, "SELECT DISTINCT ?s WHERE { ?s <http://ex/age> ?age } ORDER BY DESC(?age)");
    let subjects: Vec<_> = single.iter().filter_map(|r| r.value("s")).collect();
    assert_eq!(subjects, ["http://ex/a", "http://ex/b"]);

    let all = rows(&mut store, "SELECT ?s WHERE { ?s <http://ex/age> ?age } ORDER BY ?age");
    assert_eq!(all.len(), 3);
}

#[test]
fn test_triple_after_optional_on_its_variable_is_refused() {
    let mut store = store();
    inserted(
        &mut store,
        "INSERT DATA { <http://ex/a> <http://ex/p> 1 ; <http://ex/q> <http://ex/x1> . <http://ex/z> <http://ex/r> <http://ex/x2> }",
    );

    let envelope = store.query(
        "SELECT * WHERE { ?s <http://ex/p> ?o OPTIONAL { ?s <http://ex/q> ?x } ?y <http://ex/r> ?x }",
    );
    assert!(envelope.rows().is_empty());
    assert_eq!(store.errors().len(), 1);
    assert!(store.errors()[0].contains("after the OPTIONAL"));
    store.clear_diagnostics();

    // joining on a variable bound before the OPTIONAL still works
    let found = rows(
        &mut store,
        "SELECT ?x ?t WHERE { ?s <http://ex/p> ?o OPTIONAL { ?s <http://ex/q> ?x } ?s <http://ex/p> ?t }",
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].value("x").as_deref(), Some("http://ex/x1"));
    assert_eq!(found[0].value("t").as_deref(), Some("1"));
}

#[test]
fn test_template_blank_nodes_are_fresh() {
    let mut store = store();
    inserted(&mut store, "INSERT DATA { _:stored <http://ex/p> \"v\" }");
    let stored = rows(&mut store, "SELECT ?s WHERE { ?s <http://ex/p> ?o }")[0]
        .value("s")
        .unwrap();

    let envelope = store.query("CONSTRUCT { _:b <http://ex/q> ?o } WHERE { _:b <http://ex/p> ?o }");
    let built = envelope.rows();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].to_flat_map()["s type"], "bnode");
    assert_ne!(built[0].value("s"), Some(stored.clone()));

    inserted(&mut store, "INSERT { _:b <http://ex/q> ?o } WHERE { _:b <http://ex/p> ?o }");
    let copied = rows(&mut store, "SELECT ?s WHERE { ?s <http://ex/q> ?o }");
    assert_ne!(copied[0].value("s"), Some(stored));

    // DELETE WHERE matches the label against the stored node
    let envelope = store.query("DELETE WHERE { _:b <http://ex/p> ?o }");
    assert_eq!(envelope.result.t_count(), Some(1));
}

#[test]
fn test_well_known_prefixes_need_no_declaration() {
    let mut store = store();
    inserted(
        &mut store,
        "INSERT DATA { <http://ex/a> foaf:name \"A\" ; dc:title \"T\" ; dcterms:created 2024 }",
    );
    let found = rows(&mut store, "SELECT ?p WHERE { <http://ex/a> ?p ?o } ORDER BY ?p");
    let predicates: Vec<_> = found.iter().filter_map(|r| r.value("p")).collect();
    assert_eq!(
        predicates,
        [
            "http://purl.org/dc/elements/1.1/title",
            "http://purl.org/dc/terms/created",
            "http://xmlns.com/foaf/0.1/name",
        ]
    );
}

#[test]
fn test_literal_equality_respects_language_and_datatype() {
    let mut store = store();
    inserted(
        &mut store,
        "INSERT DATA { <http://ex/a> <http://ex/p> \"5\" , \"5\"@en , \"5\"^^<http://ex/unit> }",
    );

    let plain = rows(&mut store, "SELECT ?o WHERE { ?s <http://ex/p> ?o FILTER(?o = \"5\") }");
    assert_eq!(plain.len(), 1);
    let flat = plain[0].to_flat_map();
    assert!(!flat.contains_key("o lang"));
    assert!(!flat.contains_key("o datatype"));

    let tagged = rows(&mut store, "SELECT ?o WHERE { ?s <http://ex/p> ?o FILTER(?o = \"5\"@en) }");
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].to_flat_map()["o lang"], "en");

    let others = rows(&mut store, "SELECT ?o WHERE { ?s <http://ex/p> ?o FILTER(?o != \"5\") }");
    assert_eq!(others.len(), 2);
}
