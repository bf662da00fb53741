use kiln_ir::{NetworkContext, Value, builtin};
use smallvec::smallvec;
use test_case::test_case;

use crate::engines::{CLUSTER_DMA_2D, HOST_DMA_2D, HOST_DMA_RELEASE};
use crate::{
    AnyRankAdapter, AsyncTransferEngine, BarrierDma, ClusterDma, Direction, Error, Future, HostDma, Params,
    TransferRequest, WaitingStrategy,
};

fn request(shape: &[i64], strides: &[i64]) -> TransferRequest {
    let params = |values: &[i64]| -> Params { values.iter().map(|&v| Value::Int(v)).collect() };
    TransferRequest {
        external: Value::buffer("x_ref"),
        local: Value::buffer("x_slice"),
        shape: params(shape),
        external_strides: params(strides),
        local_strides: params(strides),
        direction: Direction::In,
        future: Future::new("x_future"),
    }
}

#[test_case(WaitingStrategy::PerTensor, Direction::In, None, "x_future"; "per_tensor")]
#[test_case(WaitingStrategy::PerTensor, Direction::Out, Some(1), "x_future_1"; "per_tensor_copy")]
#[test_case(WaitingStrategy::PerDirection, Direction::In, None, "in_future"; "per_direction_in")]
#[test_case(WaitingStrategy::PerDirection, Direction::Out, Some(0), "out_future_0"; "per_direction_out_copy")]
#[test_case(WaitingStrategy::Barrier, Direction::Out, Some(1), "barrier_future"; "barrier_ignores_everything")]
fn test_future_naming(strategy: WaitingStrategy, direction: Direction, copy: Option<usize>, expected: &str) {
    assert_eq!(strategy.future("x", direction, copy).name(), expected);
}

#[test]
fn test_check_transfer_accepts_contiguous_runs() {
    ClusterDma.check_transfer(&[64], &[1], &[1]).unwrap();
    ClusterDma.check_transfer(&[8, 16], &[64, 1], &[16, 1]).unwrap();
    ClusterDma.check_transfer(&[(1 << 17) - 1], &[1], &[1]).unwrap();
}

#[test]
fn test_check_transfer_rejects_unsupported_rank() {
    assert_eq!(
        ClusterDma.check_transfer(&[2, 2, 2], &[4, 2, 1], &[4, 2, 1]),
        Err(Error::UnsupportedRank { engine: "cluster_dma".into(), rank: 3 })
    );
}

#[test]
fn test_check_transfer_rejects_size_budget() {
    assert_eq!(
        ClusterDma.check_transfer(&[1 << 17], &[1], &[1]),
        Err(Error::TransferTooLarge { engine: "cluster_dma".into(), bytes: 1 << 17, bits: 17 })
    );
    // No size register on the barrier engine.
    BarrierDma.check_transfer(&[1 << 20], &[1], &[1]).unwrap();
}

#[test]
fn test_check_transfer_rejects_strided_innermost() {
    assert_eq!(
        ClusterDma.check_transfer(&[8, 1], &[16, 8], &[1, 1]),
        Err(Error::NonContiguous { engine: "cluster_dma".into(), external: 8, local: 1 })
    );
}

#[test]
fn test_check_transfer_rejects_rank_mismatch() {
    assert_eq!(
        ClusterDma.check_transfer(&[4, 4], &[1], &[4, 1]),
        Err(Error::TransferRankMismatch { engine: "cluster_dma".into(), shape: 2, external: 1, local: 2 })
    );
}

#[test]
fn test_direct_transfer_fills_template() {
    let ctx = NetworkContext::new("test");
    let code = ClusterDma.transfer(&ctx, &request(&[8, 16], &[64, 1])).unwrap();
    assert_eq!(code.alloc.len(), 1);
    assert!(code.deinit.is_empty());
    let [transfer] = code.transfer.as_slice() else { panic!("expected one transfer") };
    assert_eq!(transfer.template, CLUSTER_DMA_2D);
    assert_eq!(transfer.get("size_0"), Some(&Value::Int(8)));
    assert_eq!(transfer.get("size_1"), Some(&Value::Int(16)));
    assert_eq!(transfer.get("ext_stride_0"), Some(&Value::Int(64)));
    assert_eq!(transfer.get("ext_stride_1"), None);
    assert_eq!(transfer.get("future"), Some(&Value::Ident("x_future".into())));
    assert_eq!(transfer.get("direction"), Some(&Value::text("ExternalToLocal")));
}

#[test]
fn test_direct_transfer_rejects_unsupported_rank() {
    let ctx = NetworkContext::new("test");
    let result = ClusterDma.transfer(&ctx, &request(&[2, 2, 2], &[4, 2, 1]));
    assert_eq!(result, Err(Error::UnsupportedRank { engine: "cluster_dma".into(), rank: 3 }));
}

#[test]
fn test_host_dma_releases_after_wait() {
    let ctx = NetworkContext::new("test");
    let code = HostDma.transfer(&ctx, &request(&[4, 16], &[32, 1])).unwrap();
    let [release] = code.deinit.as_slice() else { panic!("expected one release") };
    assert_eq!(release.template, HOST_DMA_RELEASE);
    assert_eq!(release.get("future"), Some(&Value::Ident("x_future".into())));
}

#[test]
fn test_adapter_pads_low_ranks() {
    let ctx = NetworkContext::new("test");
    let adapter = AnyRankAdapter::new(HostDma);
    adapter.check_transfer(&[64], &[1], &[1]).unwrap();

    let code = adapter.transfer(&ctx, &request(&[64], &[1])).unwrap();
    let [transfer] = code.transfer.as_slice() else { panic!("expected one transfer") };
    assert_eq!(transfer.template, HOST_DMA_2D);
    assert_eq!(transfer.get("size_0"), Some(&Value::Int(1)));
    assert_eq!(transfer.get("size_1"), Some(&Value::Int(64)));
    assert_eq!(transfer.get("ext_stride_0"), Some(&Value::Int(0)));
    assert_eq!(code.deinit.len(), 1);
}

#[test]
fn test_adapter_loops_over_high_ranks() {
    let ctx = NetworkContext::new("test");
    let adapter = AnyRankAdapter::new(ClusterDma);
    adapter.check_transfer(&[2, 3, 4, 5], &[60, 20, 5, 1], &[60, 20, 5, 1]).unwrap();

    let code = adapter.transfer(&ctx, &request(&[2, 3, 4, 5], &[60, 20, 5, 1])).unwrap();
    // The future is allocated once, outside the loops.
    assert_eq!(code.alloc.len(), 1);

    let [outer] = code.transfer.as_slice() else { panic!("expected one loop") };
    assert_eq!(outer.template, builtin::FOR_DIM);
    assert_eq!(outer.get("var"), Some(&Value::text("x_slice_i0")));
    assert_eq!(outer.get("bound"), Some(&Value::Int(2)));

    let body = outer.get("body").and_then(Value::as_block).unwrap();
    let fragments: Vec<_> = body.iter().collect();
    assert_eq!(fragments.len(), 3);
    assert_eq!(fragments[0].template, builtin::REF_INDEXED);
    assert_eq!(fragments[0].get("name"), Some(&Value::Ident("x_ref_d0".into())));
    assert_eq!(fragments[0].get("referenced"), Some(&Value::buffer("x_ref")));
    assert_eq!(fragments[0].get("stride"), Some(&Value::Int(60)));
    assert_eq!(fragments[1].get("name"), Some(&Value::Ident("x_slice_d0".into())));

    let inner = fragments[2];
    assert_eq!(inner.template, builtin::FOR_DIM);
    assert_eq!(inner.get("bound"), Some(&Value::Int(3)));
    let innermost = inner.get("body").and_then(Value::as_block).unwrap();
    let transfer = innermost.iter().last().unwrap();
    assert_eq!(transfer.template, CLUSTER_DMA_2D);
    assert_eq!(transfer.get("ext"), Some(&Value::Ident("x_ref_d1".into())));
    assert_eq!(transfer.get("loc"), Some(&Value::Ident("x_slice_d1".into())));
    assert_eq!(transfer.get("size_0"), Some(&Value::Int(4)));
    assert_eq!(transfer.get("size_1"), Some(&Value::Int(5)));
}

#[test]
fn test_adapter_checks_stride_ranks() {
    let ctx = NetworkContext::new("test");
    let mut bad = request(&[2, 3, 4], &[12, 4, 1]);
    bad.external_strides = smallvec![Value::Int(1)];
    let result = AnyRankAdapter::new(ClusterDma).transfer(&ctx, &bad);
    assert_eq!(
        result,
        Err(Error::TransferRankMismatch { engine: "cluster_dma".into(), shape: 3, external: 1, local: 3 })
    );
}

#[test]
fn test_adapter_reports_inner_engine() {
    let adapter = AnyRankAdapter::new(BarrierDma);
    assert_eq!(adapter.name(), "barrier_dma");
    assert_eq!(adapter.waiting_strategy(), WaitingStrategy::Barrier);
    assert_eq!(adapter.templates(), adapter.inner().templates());
}
