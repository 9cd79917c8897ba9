//! Nested multi-slots and partner mirroring

mod common;

use common::mock_helpers::OpA;
use common::{ramp, test_graph};
use lazyslot::{EngineError, Roi};
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn test_partner_mirrors_resize() {
    let graph = test_graph();
    let a = graph.instantiate(OpA).unwrap();
    let b = graph.instantiate(OpA).unwrap();

    let a_in = a.input("Input").unwrap();
    let b_in = b.input("Input").unwrap();
    b_in.connect(&a_in).unwrap();
    assert_eq!(b_in.len().unwrap(), 0);

    a_in.resize(3).unwrap();
    assert_eq!(b_in.len().unwrap(), 3);
    for i in 0..3 {
        assert_eq!(b_in.at(i).unwrap().upstream().unwrap(), Some(a_in.at(i).unwrap()));
    }

    a_in.at(1).unwrap().resize(2).unwrap();
    assert_eq!(b_in.at(1).unwrap().len().unwrap(), 2);
    assert_eq!(
        b_in.at(1).unwrap().at(1).unwrap().upstream().unwrap(),
        Some(a_in.at(1).unwrap().at(1).unwrap())
    );

    a_in.resize(1).unwrap();
    assert_eq!(b_in.len().unwrap(), 1);
    assert_eq!(b_in.at(0).unwrap().upstream().unwrap(), Some(a_in.at(0).unwrap()));
}

#[test]
fn test_connect_adopts_existing_structure() {
    let graph = test_graph();
    let a = graph.instantiate(OpA).unwrap();
    let b = graph.instantiate(OpA).unwrap();

    let a_in = a.input("Input").unwrap();
    a_in.resize(2).unwrap();
    a_in.at(0).unwrap().resize(3).unwrap();

    let b_in = b.input("Input").unwrap();
    b_in.connect(&a_in).unwrap();
    assert_eq!(b_in.len().unwrap(), 2);
    assert_eq!(b_in.at(0).unwrap().len().unwrap(), 3);
    assert_eq!(b_in.at(1).unwrap().len().unwrap(), 0);

    b_in.disconnect().unwrap();
    assert_eq!(b_in.len().unwrap(), 0);
    assert!(a_in.downstream().unwrap().is_empty());
}

#[test]
fn test_output_structure_follows_input() {
    let graph = test_graph();
    let a = graph.instantiate(OpA).unwrap();
    let input = a.input("Input").unwrap();
    input.resize(2).unwrap();
    input.at(1).unwrap().resize(1).unwrap();
    input.at(1).unwrap().at(0).unwrap().set_value(ramp(&[5])).unwrap();

    let output = a.output("Output").unwrap();
    assert_eq!(output.len().unwrap(), 2);
    assert_eq!(output.at(1).unwrap().len().unwrap(), 1);

    let leaf = output.at(1).unwrap().at(0).unwrap();
    assert!(leaf.ready());
    assert_eq!(leaf.subindex().unwrap(), vec![1, 0]);
    let data = leaf.get(&Roi::new(vec![1], vec![4])).unwrap();
    assert_eq!(data.as_slice().unwrap(), &[1.0, 2.0, 3.0]);
}

#[test]
fn test_structure_observer_order() {
    let graph = test_graph();
    let a = graph.instantiate(OpA).unwrap();
    let input = a.input("Input").unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    let e = events.clone();
    input
        .notify_inserted(move |slot, index, final_len| {
            assert_eq!(slot.len().unwrap(), index + 1);
            e.lock().push(format!("inserted {index} {final_len}"));
            Ok(())
        })
        .unwrap();
    let e = events.clone();
    input
        .notify_remove(move |slot, index, final_len| {
            // Still present while the pre-remove observers run.
            assert_eq!(slot.len().unwrap(), index + 1);
            e.lock().push(format!("remove {index} {final_len}"));
            Ok(())
        })
        .unwrap();
    let e = events.clone();
    input
        .notify_removed(move |slot, index, final_len| {
            assert_eq!(slot.len().unwrap(), final_len);
            e.lock().push(format!("removed {index} {final_len}"));
            Ok(())
        })
        .unwrap();

    input.resize(2).unwrap();
    input.resize(1).unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            "inserted 0 1",
            "inserted 1 2",
            "remove 1 1",
            "removed 1 1",
        ]
    );
}

#[test]
fn test_structure_ops_require_multi_slot() {
    let graph = test_graph();
    let a = graph.instantiate(OpA).unwrap();
    let input = a.input("Input").unwrap();
    input.resize(1).unwrap();
    input.at(0).unwrap().resize(1).unwrap();
    let leaf = input.at(0).unwrap().at(0).unwrap();

    assert!(matches!(leaf.resize(2), Err(EngineError::ContractViolation(_))));
    assert!(matches!(input.at(5), Err(EngineError::ContractViolation(_))));
}
