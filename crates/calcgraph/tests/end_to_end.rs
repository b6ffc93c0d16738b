//! End-to-end scenarios exercising `Computer` against the built-in operator
//! registry, each grounded in a scenario of the testable behavior this
//! engine commits to: unit-aware arithmetic, aggregation name collisions,
//! culling to a subgraph, and tolerant out-of-order batch addition.

use calcgraph::{AddSpec, Computer, EnvConfig, Key, Label, Quantity, TaskArg, Value};

fn series(labels: &[&str], values: &[f64]) -> Quantity {
    Quantity::series("x", labels.iter().map(|s| Label::from(*s)).collect(), values.to_vec()).unwrap()
}

#[test]
fn sum_with_units_preserves_unit_and_totals_values() {
    let mut c = Computer::new(EnvConfig::default());
    let energy = series(&["coal", "gas", "wind"], &[10.0, 5.0, 2.0]).with_units(c.env().parse("MJ").unwrap());
    let key = Key::bare("energy");
    c.add(key.clone(), AddSpec::Literal(Value::Quantity(energy)), true, false).unwrap();

    let total_key = Key::bare("total");
    c.add(
        total_key.clone(),
        AddSpec::Apply("sum".into(), vec![TaskArg::Ref(key)]),
        true,
        false,
    )
    .unwrap();

    let total = c.get(&total_key).unwrap();
    let q = total.as_quantity().unwrap();
    assert!(q.dims().is_empty());
    assert_eq!(q.get(&[]), Some(17.0));
    assert_eq!(q.units().symbol, "MJ");
}

#[test]
fn unit_aware_division_builds_compound_unit_and_divides_elementwise() {
    let mut c = Computer::new(EnvConfig::default());
    let energy = Key::bare("energy");
    let time = Key::bare("time");
    c.add(
        energy.clone(),
        AddSpec::Literal(Value::Quantity(
            series(&["a", "b"], &[10.0, 20.0]).with_units(c.env().parse("MJ").unwrap()),
        )),
        true,
        false,
    )
    .unwrap();
    c.add(
        time.clone(),
        AddSpec::Literal(Value::Quantity(
            series(&["a", "b"], &[2.0, 2.0]).with_units(c.env().parse("hour").unwrap()),
        )),
        true,
        false,
    )
    .unwrap();

    let power = Key::bare("power");
    c.add(
        power.clone(),
        AddSpec::Apply("div".into(), vec![TaskArg::Ref(energy), TaskArg::Ref(time)]),
        true,
        false,
    )
    .unwrap();

    let result = c.get(&power).unwrap();
    let q = result.as_quantity().unwrap();
    assert_eq!(q.units().symbol, "MJ/hour");
    assert_eq!(q.get(&[Label::from("a")]), Some(5.0));
    assert_eq!(q.get(&[Label::from("b")]), Some(10.0));
}

#[test]
fn product_of_independent_dims_preserves_both_dim_labels() {
    let mut c = Computer::new(EnvConfig::default());
    let price = Key::bare("price");
    let volume = Key::bare("volume");
    c.add(
        price.clone(),
        AddSpec::Literal(Value::Quantity(
            Quantity::series("good", vec![Label::from("apples"), Label::from("pears")], vec![1.0, 2.0]).unwrap(),
        )),
        true,
        false,
    )
    .unwrap();
    c.add(
        volume.clone(),
        AddSpec::Literal(Value::Quantity(
            Quantity::series("region", vec![Label::from("north"), Label::from("south")], vec![3.0, 4.0]).unwrap(),
        )),
        true,
        false,
    )
    .unwrap();

    let revenue = Key::bare("revenue");
    c.add(
        revenue.clone(),
        AddSpec::Apply("mul".into(), vec![TaskArg::Ref(price), TaskArg::Ref(volume)]),
        true,
        false,
    )
    .unwrap();

    let q = c.get(&revenue).unwrap();
    let q = q.as_quantity().unwrap();
    assert_eq!(q.dims().len(), 2);
    assert_eq!(
        q.get(&[Label::from("north"), Label::from("apples")]),
        Some(3.0)
    );
    assert_eq!(
        q.get(&[Label::from("south"), Label::from("pears")]),
        Some(8.0)
    );
}

#[test]
fn aggregate_with_colliding_group_names_keeps_last_assignment() {
    let mut c = Computer::new(EnvConfig::default());
    let raw = Key::bare("raw");
    c.add(
        raw.clone(),
        AddSpec::Literal(Value::Quantity(series(&["coal", "lignite", "gas"], &[1.0, 2.0, 3.0]))),
        true,
        false,
    )
    .unwrap();

    let mut groups = std::collections::BTreeMap::new();
    groups.insert(
        "fossil".to_string(),
        Value::Sequence(vec![Value::Str("coal".into()), Value::Str("lignite".into())]),
    );
    groups.insert(
        "fossil_overridden".to_string(),
        Value::Sequence(vec![Value::Str("coal".into())]),
    );

    let grouped = Key::bare("grouped");
    c.add(
        grouped.clone(),
        AddSpec::Apply(
            "aggregate".into(),
            vec![
                TaskArg::Ref(raw),
                TaskArg::Literal(Value::Str("x".into())),
                TaskArg::Literal(Value::Mapping(groups)),
            ],
        ),
        true,
        false,
    )
    .unwrap();

    let q = c.get(&grouped).unwrap();
    let q = q.as_quantity().unwrap();
    // "coal" is claimed by both groups; the mapping is iterated in key
    // order, so "fossil_overridden" (processed after "fossil") wins it,
    // leaving "fossil" with only "lignite"'s contribution.
    assert_eq!(q.get(&[Label::from("fossil_overridden")]), Some(1.0));
    assert_eq!(q.get(&[Label::from("fossil")]), Some(2.0));
}

#[test]
fn get_culls_to_the_requested_subgraph_and_ignores_unrelated_errors() {
    let mut c = Computer::new(EnvConfig::default());
    // A key whose task would fail if ever evaluated. Added non-strict: a
    // strict add would reject this at add-time (spec.md §4.5), since the
    // reference never resolves.
    let broken = Key::bare("broken");
    c.add(
        broken,
        AddSpec::Apply("add".into(), vec![TaskArg::Ref(Key::bare("does_not_exist"))]),
        false,
        false,
    )
    .unwrap();

    let fine = Key::bare("fine");
    c.add(fine.clone(), AddSpec::Literal(Value::Scalar(7.0)), true, false).unwrap();

    // Requesting `fine` must never touch `broken`'s task.
    assert_eq!(c.get(&fine).unwrap().as_scalar(), Some(7.0));
}

#[test]
fn add_queue_resolves_out_of_order_batch_then_evaluates() {
    let mut c = Computer::new(EnvConfig::default());
    let a = Key::bare("a");
    let b = Key::bare("b");
    let total = Key::bare("total");

    let items = vec![
        (
            total.clone(),
            AddSpec::Apply("add".into(), vec![TaskArg::Ref(a.clone()), TaskArg::Ref(b.clone())]),
        ),
        (b.clone(), AddSpec::Literal(Value::Quantity(series(&["i"], &[4.0])))),
        (a.clone(), AddSpec::Literal(Value::Quantity(series(&["i"], &[3.0])))),
    ];
    let added = c.add_queue(items).unwrap();
    assert_eq!(added.len(), 3);

    let result = c.get(&total).unwrap();
    let q = result.as_quantity().unwrap();
    assert_eq!(q.get(&[Label::from("i")]), Some(7.0));
}
