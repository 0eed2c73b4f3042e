//! End-to-end tests: query text through conversion, evaluation and back to text

use std::sync::Arc;

use chrono::Timelike;
use oql::{
    CallStyle, DateTimeKind, EnumValue, ErrorKind, Expr, FunctionTable, Lambda, Member, NodeKind,
    NumberLiteral, Parameter, QueryParseError, Schema, Type, TypeSig, Value, compile_filter,
    to_query_string,
};
use rust_decimal::Decimal;
use serde_json::json;

const SCHEMA: &str = r#"{
    "enums": [{ "name": "Status", "members": ["Active", "Inactive", "Archived"] }],
    "types": [{ "name": "Account", "properties": {
        "Id": "Int32",
        "Name": "String",
        "Status": "Status",
        "Rank": "Int32?",
        "Balance": "Decimal",
        "Opened": "DateTime",
        "Closed": "DateTime?",
        "Updated": "DateTimeOffset",
        "Attributes": "Dictionary<String,String>",
        "Meta": "Dictionary<String,Object>",
        "Tags": "String[]"
    } }]
}"#;

struct Fixture {
    schema: Schema,
    functions: FunctionTable,
    account: Type,
    rows: Vec<Value>,
}

impl Fixture {
    fn new() -> Self {
        let schema = Schema::from_json(SCHEMA).unwrap();
        let account = Type::Resource(schema.resource("Account").unwrap().clone());
        let rows = json!([
            { "id": 1, "name": "Alpha", "status": "Active", "rank": 1, "balance": "10.50",
              "opened": "2019-06-01T08:00:00Z", "closed": "2022-05-01T00:00:00Z", "updated": "2020-01-01T12:00:00+02:00",
              "attributes": { "color": "red" }, "meta": { "level": 1 }, "tags": ["gold", "eu"] },
            { "id": 2, "name": "Beta", "status": "Inactive", "rank": null, "balance": 0,
              "opened": "2021-03-15T00:00:00Z", "closed": null, "updated": "2021-01-01T00:00:00+00:00",
              "attributes": {}, "meta": {}, "tags": [] },
            { "id": 3, "name": "Gamma", "status": "Active", "rank": 4, "balance": "250",
              "opened": "2020-12-31T23:59:59Z", "closed": "2021-02-01T00:00:00Z", "updated": "2020-06-01T00:00:00-05:00",
              "attributes": { "color": "blue", "size": "xl" }, "meta": { "level": 2 },
              "tags": ["eu"] },
            { "id": 4, "name": "Delta", "status": "Archived", "rank": 2, "balance": "-3",
              "opened": "2018-01-01T00:00:00Z", "closed": null, "updated": "2019-01-01T00:00:00+01:00",
              "attributes": { "color": "red" }, "meta": { "level": 5, "note": "late" },
              "tags": ["us", "gold"] }
        ]);
        let rows = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|row| Value::from_json(row, &account, &schema).unwrap())
            .collect();
        Fixture {
            schema,
            functions: FunctionTable::builtin(),
            account,
            rows,
        }
    }

    fn compile(&self, query: &str) -> Result<Lambda, QueryParseError> {
        compile_filter(query, &self.account, &self.schema, &self.functions)
    }

    /// Ids of the rows matching a filter
    fn ids(&self, query: &str) -> Vec<i64> {
        let lambda = self.compile(query).unwrap();
        self.matching(&lambda)
    }

    fn matching(&self, lambda: &Lambda) -> Vec<i64> {
        self.rows
            .iter()
            .filter(|row| lambda.test(std::slice::from_ref(row)).unwrap())
            .map(|row| row.as_entity().unwrap().get("Id").as_i64().unwrap())
            .collect()
    }
}

// ============ Literal Parsing ============

#[test]
fn number_literals_follow_suffix_and_shape() {
    let cases = [
        ("42", NumberLiteral::Int32(42)),
        ("42.5", NumberLiteral::Double(42.5)),
        ("42m", NumberLiteral::Decimal(Decimal::from(42))),
        ("42M", NumberLiteral::Decimal(Decimal::from(42))),
        ("42f", NumberLiteral::Float(42.0)),
        ("42L", NumberLiteral::Int64(42)),
    ];
    for (text, expected) in cases {
        let node = oql::parse(text).unwrap();
        assert_eq!(node.kind, NodeKind::Number(expected), "literal {text}");
    }
}

#[test]
fn malformed_number_is_a_syntax_error() {
    let err = oql::parse("42.5.6").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn date_literals_pick_their_kind() {
    let node = oql::parse("datetime'2020-01-01T10:00:00Z'").unwrap();
    let NodeKind::DateTime(value) = node.kind else {
        panic!("expected DateTime, got {:?}", node.kind);
    };
    assert_eq!(value.kind, DateTimeKind::Utc);
    assert_eq!(value.naive.hour(), 10);

    let node = oql::parse("datetime'2020-01-01T10:00:00+02:00'").unwrap();
    let NodeKind::DateTimeOffset(value) = node.kind else {
        panic!("expected DateTimeOffset, got {:?}", node.kind);
    };
    assert_eq!(value.offset().local_minus_utc(), 2 * 3600);
}

#[test]
fn date_literals_round_trip_through_text() {
    let fx = Fixture::new();
    for query in [
        "opened lt datetime'2020-01-01T10:00:00Z'",
        "updated gt datetime'2020-01-01T10:00:00+02:00'",
        "opened ge datetime'2019-06-01T08:00:00.250Z'",
    ] {
        let text = to_query_string(&fx.compile(query).unwrap(), &fx.functions).unwrap();
        assert_eq!(text, query);
    }
}

// ============ Enums ============

#[test]
fn enum_comparison_matches_by_member() {
    let fx = Fixture::new();
    assert_eq!(fx.ids("status eq 'Active'"), [1, 3]);
    assert_eq!(fx.ids("status ne 'Active'"), [2, 4]);
    assert_eq!(fx.ids("status eq 'archived'"), [4]);
}

#[test]
fn enum_comparison_equals_typed_expression() {
    let fx = Fixture::new();
    let status = fx.schema.enum_type("Status").unwrap();
    let x = Parameter::new("x", fx.account.clone());
    let typed = Lambda::new(
        vec![x.clone()],
        x.expr()
            .property("Status")
            .unwrap()
            .eq(Expr::constant(EnumValue::new(status, 0))),
    );

    let parsed = fx.compile("status eq 'Active'").unwrap();
    assert_eq!(fx.matching(&parsed), fx.matching(&typed));
    assert_eq!(
        to_query_string(&parsed, &fx.functions).unwrap(),
        to_query_string(&typed, &fx.functions).unwrap()
    );
}

#[test]
fn unknown_enum_member_is_a_resolution_error() {
    let fx = Fixture::new();
    let err = fx.compile("status eq 'Frozen'").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(err.message().contains("Frozen"));
}

// ============ In Operator ============

#[test]
fn in_matches_array_members() {
    let fx = Fixture::new();
    assert_eq!(fx.ids("id in [1,2,3]"), [1, 2, 3]);
    assert_eq!(fx.ids("id in [7]"), Vec::<i64>::new());
}

#[test]
fn in_over_nullable_property() {
    let fx = Fixture::new();
    // Beta has no rank and must not match
    assert_eq!(fx.ids("rank in [1,2,3]"), [1, 4]);
    assert_eq!(fx.ids("not (rank in [1,2,3])"), [2, 3]);
}

// ============ Function Resolution ============

fn score_table(first: Type, second: Type) -> FunctionTable {
    let mut table = FunctionTable::new();
    for (id, ty, result) in [("Score.First", first, 1), ("Score.Second", second, 2)] {
        let member = Member::method(
            id,
            vec![TypeSig::exact(ty)],
            TypeSig::exact(Type::Int32),
            move |_| Ok(Value::Int32(result)),
        )
        .static_member();
        table.add("score({0})", member, CallStyle::Static).unwrap();
    }
    table
}

fn resolved_member(table: &FunctionTable, query: &str) -> String {
    let fx = Fixture::new();
    let lambda = compile_filter(query, &fx.account, &fx.schema, table).unwrap();
    let Expr::Binary { left, .. } = &lambda.body else {
        panic!("expected comparison, got {}", lambda.body);
    };
    let Expr::Call { member, .. } = left.as_ref() else {
        panic!("expected call, got {left}");
    };
    member.id().to_string()
}

#[test]
fn first_assignable_candidate_wins() {
    let table = score_table(Type::Int32, Type::String);
    assert_eq!(resolved_member(&table, "score(id) eq 1"), "Score.First");
    assert_eq!(resolved_member(&table, "score(name) eq 2"), "Score.Second");
}

#[test]
fn date_parts_lift_over_nullable_dates() {
    let fx = Fixture::new();
    assert_eq!(fx.ids("year(closed) eq 2022"), [1]);
    assert_eq!(fx.ids("month(closed) lt 3"), [3]);
    assert_eq!(fx.ids("year(closed) eq null"), [2, 4]);
    assert_eq!(
        resolved_member(&FunctionTable::builtin(), "year(closed) eq 2022"),
        "Nullable<DateTime>.Year"
    );
    assert_eq!(
        resolved_member(&FunctionTable::builtin(), "year(opened) eq 2022"),
        "DateTime.Year"
    );
}

#[test]
fn registration_order_breaks_ties() {
    let table = score_table(Type::String, Type::String);
    for _ in 0..8 {
        assert_eq!(resolved_member(&table, "score(name) eq 1"), "Score.First");
    }
}

#[test]
fn no_candidate_fits() {
    let fx = Fixture::new();
    let table = score_table(Type::Int32, Type::String);
    let err = compile_filter("score(balance) eq 1", &fx.account, &fx.schema, &table).unwrap_err();
    assert!(err.message().contains("score"), "{err}");
}

// ============ Error Locality ============

#[test]
fn syntax_error_reports_column() {
    let fx = Fixture::new();
    let err = fx.compile("name eq 'x' )").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert_eq!(err.column(), Some(13));
    assert!(err.to_string().contains("column 13"), "{err}");
}

#[test]
fn unknown_symbol_is_named() {
    let fx = Fixture::new();
    let err = fx.compile("name eq 'x' or colour eq 'red'").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(err.message().contains("colour"), "{err}");
    assert_eq!(err.column(), Some(16));
}

#[test]
fn unsupported_operands_are_distinguished() {
    let fx = Fixture::new();
    let err = fx.compile("name gt 'a'").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

// ============ Dictionary Access ============

#[test]
fn dictionary_access_reads_key() {
    let fx = Fixture::new();
    assert_eq!(fx.ids("attributes['color'] eq 'red'"), [1, 4]);
    assert_eq!(fx.ids("attributes['size'] eq 'xl'"), [3]);
}

#[test]
fn dictionary_missing_key_reads_null() {
    let fx = Fixture::new();
    assert_eq!(fx.ids("attributes['size'] eq null"), [1, 2, 4]);
    assert_eq!(fx.ids("attributes['color'] ne null"), [1, 3, 4]);
}

#[test]
fn dictionary_access_through_dotted_name() {
    let fx = Fixture::new();
    assert_eq!(fx.ids("attributes.color eq 'blue'"), [3]);
}

#[test]
fn object_valued_dictionary_entries_compare_and_round_trip() {
    let fx = Fixture::new();
    let cases: [(&str, &[i64]); 4] = [
        ("meta.level in [1,2]", &[1, 3]),
        ("meta.level eq 1", &[1]),
        ("cast(meta.level,t'Int32?') eq null", &[2]),
        ("cast(meta.level,t'Int32?') gt 1", &[3, 4]),
    ];
    for (query, expected) in cases {
        let original = fx.compile(query).unwrap();
        assert_eq!(fx.matching(&original), expected, "query {query}");

        let text = to_query_string(&original, &fx.functions).unwrap();
        assert_eq!(fx.ids(&text), expected, "query {query} → {text}");
    }

    let text = to_query_string(
        &fx.compile("cast(meta.level,t'Int32?') eq null").unwrap(),
        &fx.functions,
    )
    .unwrap();
    assert_eq!(text, "cast(meta['level'],t'Int32?') eq null");
}

// ============ Round Trips ============

const ROUND_TRIP: &[&str] = &[
    "id eq 1",
    "name eq 'Alpha' or id gt 2",
    "status eq 'Active' and rank gt 1",
    "rank eq null",
    "balance ge 10.5m",
    "startswith(name,'Al') or endswith(name,'ta')",
    "length(name) eq 5",
    "tags.any(t:t eq 'gold')",
    "tags.count() gt 1",
    "attributes['color'] eq 'red'",
    "not (status eq 'Archived')",
    "id mod 2 eq 0",
    "year(opened) eq 2020",
    "year(closed) eq 2022",
    "id in [2,4]",
    "name eq 'O''Brien'",
    "meta.level in [1,2]",
    "cast(meta.level,t'Int32?') eq null",
];

#[test]
fn text_to_expression_to_text_is_stable() {
    let fx = Fixture::new();
    for query in ROUND_TRIP {
        let first = to_query_string(&fx.compile(query).unwrap(), &fx.functions).unwrap();
        let second = to_query_string(&fx.compile(&first).unwrap(), &fx.functions).unwrap();
        assert_eq!(first, second, "query {query}");
    }
}

#[test]
fn serialized_filters_select_the_same_rows() {
    let fx = Fixture::new();
    for query in ROUND_TRIP {
        let original = fx.compile(query).unwrap();
        let text = to_query_string(&original, &fx.functions).unwrap();
        let reparsed = fx.compile(&text).unwrap();
        assert_eq!(fx.matching(&original), fx.matching(&reparsed), "query {query} → {text}");
    }
}

#[test]
fn typed_expression_round_trips_through_text() {
    let fx = Fixture::new();
    let x = Parameter::new("x", fx.account.clone());
    let body = x
        .expr()
        .property("Balance")
        .unwrap()
        .gt(Expr::constant(Decimal::new(5, 0)))
        .and(x.expr().property("Name").unwrap().ne(Expr::constant("Gamma")));
    let typed = Lambda::new(vec![x], body);

    let text = to_query_string(&typed, &fx.functions).unwrap();
    assert_eq!(text, "(balance gt 5m) and (name ne 'Gamma')");
    assert_eq!(fx.ids(&text), fx.matching(&typed));
    assert_eq!(fx.matching(&typed), [1]);
}

// ============ Sharing ============

#[test]
fn shared_schema_compiles_across_threads() {
    let fx = Arc::new(Fixture::new());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let fx = fx.clone();
            std::thread::spawn(move || fx.ids(&format!("id gt {i}")).len())
        })
        .collect();
    let counts: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(counts, [4, 3, 2, 1]);
}
