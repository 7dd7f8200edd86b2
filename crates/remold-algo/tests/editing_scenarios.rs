//! End-to-end editing scenarios: linear round-trip, quadratic via COO,
//! equation flipping, and bilinear terms.

use remold_algo::container::Container;
use remold_algo::nltree::eval::eval_tree;
use remold_algo::nltree::gams::{from_gams, to_gams};
use remold_core::{BasisStatus, Cone, Idx};

#[test]
fn linear_roundtrip() {
    let mut ctr = Container::new("linear");
    let v = ctr.add_posvars(3);
    let ei = ctr.add_func().unwrap();

    ctr.equ_addlin(ei, &v, &[1.5, -2.0, 0.25]).unwrap();

    let (vis, vals) = ctr.equ_getlin(ei).unwrap();
    assert_eq!(vis.len(), 3);
    assert_eq!(vis, &[Idx::new(0), Idx::new(1), Idx::new(2)]);
    assert_eq!(vals, &[1.5, -2.0, 0.25]);

    // a mapping is not a constraint
    assert_eq!(ctr.get_nb_lequ_eq(), 0);
    assert_eq!(ctr.get_nb_lequ_le(), 0);
    assert_eq!(ctr.get_nb_lequ_ge(), 0);

    ctr.chk_expensive().unwrap();
}

#[test]
fn quadratic_via_coo_absolute() {
    let mut ctr = Container::new("quad");
    let _v = ctr.add_vars(3);
    let ei = ctr.add_con(Cone::RPlus).unwrap();

    let idxs = [Idx::new(0), Idx::new(1), Idx::new(2)];
    ctr.equ_addquadabsolute(ei, &idxs, &idxs, &[2.0, 4.0, 6.0], 1.0).unwrap();
    ctr.chk_expensive().unwrap();

    // three square terms scaled by x/2 = 1, 2, 3
    let tree = ctr.equs[ei.idx()].tree.as_ref().unwrap();
    let val = eval_tree(tree, &ctr.pool, &[1.0, 1.0, 1.0]).unwrap();
    assert!((val - 6.0).abs() < 1e-12);
    let val = eval_tree(tree, &ctr.pool, &[2.0, 3.0, 4.0]).unwrap();
    assert!((val - (4.0 + 18.0 + 48.0)).abs() < 1e-12);

    // emitting and parsing back yields an equivalent tree
    let stream = to_gams(tree, ei).unwrap();
    let back = from_gams(&stream).unwrap().expect("nonlinear stream");
    assert_eq!(back.ei, ei);
    for point in [[1.0, 1.0, 1.0], [0.5, -2.0, 3.0], [-1.0, 0.0, 2.0]] {
        let a = eval_tree(tree, &ctr.pool, &point).unwrap();
        let b = eval_tree(&back, &ctr.pool, &point).unwrap();
        assert!((a - b).abs() < 1e-12, "{a} vs {b} at {point:?}");
    }

    // the same variables are reachable in both trees
    let mut vars_a = tree.collect_vars();
    let mut vars_b = back.collect_vars();
    vars_a.sort();
    vars_b.sort();
    assert_eq!(vars_a, vars_b);
}

#[test]
fn flip_equation_twice() {
    let mut ctr = Container::new("flip");
    let v = ctr.add_vars(2);
    let ei = ctr.add_con(Cone::RMinus).unwrap();
    ctr.equ_addlin(ei, &v, &[2.0, 3.0]).unwrap();
    ctr.equ_setcst(ei, 5.0).unwrap();
    ctr.equs[ei.idx()].basis = BasisStatus::Lower;
    ctr.equs[ei.idx()].multiplier = Some(0.75);

    let flipped = ctr.equ_flip(ei).unwrap();
    {
        let f = &ctr.equs[flipped.idx()];
        assert_eq!(f.lequ.coeffs(), &[-2.0, -3.0]);
        assert_eq!(f.get_cst().unwrap(), -5.0);
        assert_eq!(f.cone, Cone::RPlus);
        assert_eq!(f.basis, BasisStatus::Upper);
        assert_eq!(f.multiplier, Some(-0.75));
    }
    ctr.chk_expensive().unwrap();

    // flipping again restores the original algebraic content
    let back = ctr.equ_flip(flipped).unwrap();
    let b = &ctr.equs[back.idx()];
    assert_eq!(b.lequ.coeffs(), &[2.0, 3.0]);
    assert_eq!(b.get_cst().unwrap(), 5.0);
    assert_eq!(b.cone, Cone::RMinus);
    assert_eq!(b.basis, BasisStatus::Lower);
    assert_eq!(b.multiplier, Some(0.75));
    ctr.chk_expensive().unwrap();

    // references to the original resolve through the rosetta
    assert_eq!(ctr.get_equation(ei).unwrap().ei, back);
}

#[test]
fn bilinear_accumulates() {
    let mut ctr = Container::new("bilin");
    let v = ctr.add_vars(3);
    let w = ctr.add_vars(3);
    let ei = ctr.add_func().unwrap();

    ctr.equ_addbilin(ei, &v, &w, 0.5).unwrap();
    ctr.chk_expensive().unwrap();

    let tree = ctr.equs[ei.idx()].tree.as_ref().unwrap();
    let root = tree.node(tree.root().unwrap());
    assert_eq!(root.live_children().count(), 3);

    let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let one_pass = 0.5 * (4.0 + 10.0 + 18.0);
    let val = eval_tree(tree, &ctr.pool, &x).unwrap();
    assert!((val - one_pass).abs() < 1e-12);

    // re-adding the same positions accumulates
    ctr.equ_addbilin(ei, &v, &w, 0.5).unwrap();
    let tree = ctr.equs[ei.idx()].tree.as_ref().unwrap();
    let val = eval_tree(tree, &ctr.pool, &x).unwrap();
    assert!((val - 2.0 * one_pass).abs() < 1e-12);
    ctr.chk_expensive().unwrap();
}

#[test]
fn dup_then_remove_is_semantically_neutral() {
    let mut ctr = Container::new("dup");
    let v = ctr.add_vars(2);
    let ei = ctr.add_func().unwrap();
    ctr.equ_addlin(ei, &v, &[1.0, -4.0]).unwrap();
    ctr.equ_setcst(ei, 2.0).unwrap();

    let (m_before, n_before) = (ctr.m, ctr.n);
    let ei_new = ctr.dup_equ(ei, 0, Idx::INVALID).unwrap();

    // active counts unchanged, content identical, rosetta redirects
    assert_eq!(ctr.m, m_before);
    assert_eq!(ctr.n, n_before);
    assert_eq!(ctr.equs[ei_new.idx()].lequ.coeffs(), &[1.0, -4.0]);
    assert_eq!(ctr.equs[ei_new.idx()].get_cst().unwrap(), 2.0);
    assert_eq!(ctr.get_equation(ei).unwrap().ei, ei_new);
    ctr.chk_expensive().unwrap();
}

#[test]
fn quadratic_boundary_cases() {
    let mut ctr = Container::new("bounds");
    let _v = ctr.add_vars(2);
    let ei = ctr.add_func().unwrap();

    // zero entries is an error
    let err = ctr.equ_addquadabsolute(ei, &[], &[], &[], 1.0).unwrap_err();
    assert!(matches!(err, remold_core::CoreError::RuntimeError(_)));

    // an index at total_m is out of range
    let bad = Idx::new(ctr.nequs_total());
    assert!(ctr.equ_getlin(bad).is_err());

    // the constant of a typeless equation is refused
    let untyped = ctr.add_equation().unwrap();
    assert!(matches!(
        ctr.equ_setcst(untyped, 1.0),
        Err(remold_core::CoreError::UnExpectedData(_))
    ));
}
