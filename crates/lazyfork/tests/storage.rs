// SPDX-License-Identifier: GPL-3.0

//! Cross-module storage tests, runnable without a network: layered resolution,
//! merged paging, fold behavior, and sealed block chains over snapshot state.

use lazyfork::{
	Block, ExecutorConfig, SnapshotStorage, StorageLayer, StorageLayerProvider, StorageValue,
};
use subxt::config::substrate::H256;

fn snapshot(entries: &[(&[u8], &[u8])]) -> StorageLayerProvider {
	StorageLayerProvider::Snapshot(
		entries.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect::<SnapshotStorage>(),
	)
}

async fn get(provider: &StorageLayerProvider, key: &[u8]) -> Option<Vec<u8>> {
	provider.get(key, false).await.unwrap().map(|v| v.as_ref().clone())
}

#[tokio::test]
async fn layering_resolves_to_most_recently_mutated_layer() {
	// Base map M, three overlays stacked on top.
	let base = snapshot(&[(b"a", b"m_a"), (b"b", b"m_b"), (b"c", b"m_c")]);

	let mut l1 = StorageLayer::new(base);
	l1.set(b"a".to_vec(), Some(StorageValue::value(b"l1_a".to_vec())));
	l1.set(b"d".to_vec(), Some(StorageValue::value(b"l1_d".to_vec())));

	let mut l2 = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l1)));
	l2.set(b"b".to_vec(), Some(StorageValue::Deleted));

	let mut l3 = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l2)));
	l3.set(b"a".to_vec(), Some(StorageValue::value(b"l3_a".to_vec())));
	let top = StorageLayerProvider::Overlay(Box::new(l3));

	// Most-recent override wins.
	assert_eq!(get(&top, b"a").await, Some(b"l3_a".to_vec()));
	// Tombstone between top and base hides the key.
	assert_eq!(get(&top, b"b").await, None);
	// No override anywhere: the base answers.
	assert_eq!(get(&top, b"c").await, Some(b"m_c".to_vec()));
	// Override in a middle layer is visible from the top.
	assert_eq!(get(&top, b"d").await, Some(b"l1_d".to_vec()));
	assert_eq!(get(&top, b"missing").await, None);
}

#[tokio::test]
async fn paging_is_complete_and_ordered_for_any_page_size() {
	let base = snapshot(&[
		(b"p_01", b"v"),
		(b"p_04", b"v"),
		(b"p_07", b"v"),
		(b"p_09", b"v"),
		(b"q_01", b"v"),
	]);

	let mut l1 = StorageLayer::new(base);
	l1.set(b"p_02".to_vec(), Some(StorageValue::value(b"v".to_vec())));
	l1.set(b"p_08".to_vec(), Some(StorageValue::value(b"v".to_vec())));

	let mut l2 = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l1)));
	l2.set(b"p_04".to_vec(), Some(StorageValue::Deleted));
	l2.set(b"p_05".to_vec(), Some(StorageValue::value(b"v".to_vec())));
	let top = StorageLayerProvider::Overlay(Box::new(l2));

	let expected: Vec<Vec<u8>> = [&b"p_01"[..], b"p_02", b"p_05", b"p_07", b"p_08", b"p_09"]
		.iter()
		.map(|k| k.to_vec())
		.collect();

	// One big page.
	assert_eq!(top.keys_paged(b"p", 100, b"p").await.unwrap(), expected);

	// Chained pages, for every page size: concatenation must equal the full
	// sorted, deduplicated, non-tombstoned key set.
	for page_size in 1..=7u32 {
		let mut collected = Vec::new();
		let mut cursor = b"p".to_vec();
		loop {
			let page = top.keys_paged(b"p", page_size, &cursor).await.unwrap();
			assert!(page.len() <= page_size as usize);
			let Some(last) = page.last() else { break };
			cursor = last.clone();
			let exhausted = page.len() < page_size as usize;
			collected.extend(page);
			if exhausted {
				break;
			}
		}
		assert_eq!(collected, expected, "page_size {page_size}");
	}
}

#[tokio::test]
async fn reintroduced_local_key_keeps_global_sort_order() {
	// A key reintroduced locally after a parent-only key must not invert the
	// merged order.
	let base = snapshot(&[(b"k_1", b"v"), (b"k_3", b"v")]);

	let mut l1 = StorageLayer::new(base);
	l1.set(b"k_2".to_vec(), Some(StorageValue::Deleted));
	let mut l2 = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l1)));
	l2.set(b"k_2".to_vec(), Some(StorageValue::value(b"back".to_vec())));
	let top = StorageLayerProvider::Overlay(Box::new(l2));

	let keys = top.keys_paged(b"k", 10, b"k").await.unwrap();
	assert_eq!(keys, vec![b"k_1".to_vec(), b"k_2".to_vec(), b"k_3".to_vec()]);
}

#[tokio::test]
async fn folding_a_chain_preserves_every_read() {
	let base = snapshot(&[(b"a", b"m_a"), (b"b", b"m_b"), (b"pfx_x", b"m_x")]);

	let mut l1 = StorageLayer::new(base);
	l1.set(b"b".to_vec(), Some(StorageValue::value(b"l1_b".to_vec())));
	l1.set(b"c".to_vec(), Some(StorageValue::value(b"l1_c".to_vec())));

	let mut l2 = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l1)));
	l2.set(b"pfx".to_vec(), Some(StorageValue::DeletedPrefix));
	l2.set(b"c".to_vec(), Some(StorageValue::Deleted));

	let mut top = StorageLayer::new(StorageLayerProvider::Overlay(Box::new(l2)));
	top.set(b"d".to_vec(), Some(StorageValue::value(b"top_d".to_vec())));

	let keys: &[&[u8]] = &[b"a", b"b", b"c", b"d", b"pfx_x", b"nope"];

	let provider = StorageLayerProvider::Overlay(Box::new(top));
	let mut before = Vec::new();
	for key in keys {
		before.push(get(&provider, key).await);
	}

	// Collapse the chain and replay the same reads.
	let StorageLayerProvider::Overlay(mut top) = provider else { unreachable!() };
	top.fold();
	let provider = StorageLayerProvider::Overlay(top);

	for (key, expected) in keys.iter().zip(before) {
		assert_eq!(get(&provider, key).await, expected, "key {key:?}");
	}

	// Paging agrees too.
	let keys = provider.keys_paged(b"", 100, b"").await.unwrap();
	assert_eq!(
		keys,
		vec![b"a".to_vec(), b"b".to_vec(), b"d".to_vec()],
		"pfx_x shadowed, c deleted"
	);
}

#[tokio::test]
async fn sealed_block_chain_layers_diffs_over_parents() {
	let genesis = Block::from_snapshot(
		0,
		H256::from([0u8; 32]),
		[(b"balance".to_vec(), b"100".to_vec()), (b"code".to_vec(), b"wasm".to_vec())]
			.into_iter()
			.collect(),
		ExecutorConfig::default(),
	);

	// Block 1 spends some balance and writes a new key.
	let block1 = seal_child(
		&genesis,
		1,
		vec![
			(b"balance".to_vec(), StorageValue::value(b"60".to_vec())),
			(b"nonce".to_vec(), StorageValue::value(b"1".to_vec())),
		],
	);

	// Block 2 deletes the nonce and a whole prefix.
	let block2 = seal_child(
		&block1,
		2,
		vec![
			(b"nonce".to_vec(), StorageValue::Deleted),
			(b"bal".to_vec(), StorageValue::DeletedPrefix),
		],
	);

	// Every block sees its own state, parents stay untouched.
	assert_eq!(read(&genesis, b"balance").await, Some(b"100".to_vec()));
	assert_eq!(read(&block1, b"balance").await, Some(b"60".to_vec()));
	assert_eq!(read(&block1, b"nonce").await, Some(b"1".to_vec()));
	assert_eq!(read(&block2, b"balance").await, None, "prefix delete shadows the parent diff");
	assert_eq!(read(&block2, b"nonce").await, None);
	assert_eq!(read(&block2, b"code").await, Some(b"wasm".to_vec()));

	// The sealed diff records the flat effect.
	let diff = block1.sealed_diff().unwrap();
	assert!(diff.iter().any(|(k, v)| k == b"balance" && v.as_deref() == Some(b"60")));
}

async fn read(block: &Block, key: &[u8]) -> Option<Vec<u8>> {
	block.get(key).await.unwrap().map(|v| v.as_ref().clone())
}

fn seal_child(parent: &Block, number: u32, diff: Vec<(Vec<u8>, StorageValue)>) -> Block {
	let hash = H256::from([number as u8; 32]);
	Block::materialized(number, hash, vec![1, 2, 3], vec![], diff, parent)
}
