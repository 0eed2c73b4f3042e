use criterion::{Criterion, black_box, criterion_group, criterion_main};
use oql::{
    CompiledQuery, Entity, FunctionTable, QueryRequest, Schema, Type, Value, compile_filter,
    to_query_string,
};

const SCHEMA: &str = r#"{
    "enums": [{ "name": "Status", "members": ["Open", "Closed"] }],
    "types": [{ "name": "Order", "properties": {
        "Id": "Int32", "Customer": "String", "Status": "Status",
        "Total": "Decimal", "Lines": "Int32[]"
    } }]
}"#;

const FILTER: &str =
    "status eq 'Open' and (startswith(customer,'A') or total gt 100m) and lines.any(l:l gt 3)";

fn setup() -> (Schema, Type, FunctionTable) {
    let schema = Schema::from_json(SCHEMA).unwrap();
    let order = Type::Resource(schema.resource("Order").unwrap().clone());
    (schema, order, FunctionTable::builtin())
}

fn orders(schema: &Schema, count: i32) -> Vec<Value> {
    let order = schema.resource("Order").unwrap();
    let status = schema.enum_type("Status").unwrap();
    (0..count)
        .map(|i| {
            Entity::new(order)
                .with("Id", i)
                .with("Customer", if i % 3 == 0 { "Acme" } else { "Bolt" })
                .with("Status", oql::EnumValue::new(status, i64::from(i % 2)))
                .with("Total", rust_decimal::Decimal::from(i % 250))
                .with("Lines", Value::Array((0..i % 6).map(Value::Int32).collect()))
                .into_value()
        })
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_filter", |b| {
        b.iter(|| oql::parse(black_box(FILTER)).unwrap())
    });
}

fn bench_compile(c: &mut Criterion) {
    let (schema, order, functions) = setup();
    c.bench_function("compile_filter", |b| {
        b.iter(|| compile_filter(black_box(FILTER), &order, &schema, &functions).unwrap())
    });
}

fn bench_serialize(c: &mut Criterion) {
    let (schema, order, functions) = setup();
    let lambda = compile_filter(FILTER, &order, &schema, &functions).unwrap();
    c.bench_function("serialize_filter", |b| {
        b.iter(|| to_query_string(black_box(&lambda), &functions).unwrap())
    });
}

fn bench_apply(c: &mut Criterion) {
    let (schema, order, functions) = setup();
    let items = orders(&schema, 10_000);
    let request = QueryRequest {
        filter: Some(FILTER.into()),
        order_by: Some("total desc, id".into()),
        top: Some(50),
        ..Default::default()
    };
    let query = CompiledQuery::compile(&request, &order, &schema, &functions).unwrap();
    c.bench_function("apply_compiled_query", |b| {
        b.iter(|| query.apply(black_box(&items)).unwrap())
    });
}

criterion_group!(benches, bench_parse, bench_compile, bench_serialize, bench_apply);
criterion_main!(benches);
