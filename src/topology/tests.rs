//! Topology Module Tests
//!
//! ## Test Scopes
//! - **Tree**: weighted descent, free slot aggregation and reservations.
//! - **Layouts**: writability rules and the pick-for-write choice.
//! - **Membership cascade**: dead, recovered and re-reported servers.
//! - **Growth**: replica placement per replication code and the growth cycle.
//! - **Configuration**: IP range to data center / rack mapping.

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::membership::types::{Heartbeat, MembershipEvent};
    use crate::sequence::MemorySequencer;
    use crate::storage::Store;
    use crate::storage::types::{ReplicationType, VolumeId, VolumeInfo};
    use crate::topology::configuration::locate;
    use crate::topology::growth::find_empty_slots;
    use crate::topology::node::{Node, NodeId, weighted_pick};
    use crate::topology::{
        Configuration, DataNode, Location, StoreAllocator, Topology, TopologyState,
        VolumeAllocator, VolumeGrowth,
    };

    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    const LIMIT: u64 = 1000;

    fn rep(code: &str) -> ReplicationType {
        code.parse().unwrap()
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn volume(id: u32, collection: &str, replication: &str) -> VolumeInfo {
        VolumeInfo::new(VolumeId(id), collection, rep(replication))
    }

    fn heartbeat(
        port: u16,
        max: usize,
        data_center: &str,
        rack: &str,
        volumes: Vec<VolumeInfo>,
    ) -> Heartbeat {
        Heartbeat {
            ip: "127.0.0.1".to_string(),
            port,
            public_url: format!("localhost:{}", port),
            max_volume_count: max,
            data_center: data_center.to_string(),
            rack: rack.to_string(),
            volumes,
            is_initial: false,
        }
    }

    fn node_id(port: u16) -> NodeId {
        DataNode::id_for("127.0.0.1", port)
    }

    fn pair(data_center: &str, rack: &str) -> (String, String) {
        (data_center.to_string(), rack.to_string())
    }

    fn urls(locations: &[Location]) -> Vec<String> {
        let mut urls: Vec<String> = locations.iter().map(|l| l.url.clone()).collect();
        urls.sort();
        urls
    }

    fn new_topology(limit: u64, pulse: Duration) -> (Arc<Topology>, crate::membership::types::EventReceivers) {
        Topology::new("topo", limit, pulse, Arc::new(MemorySequencer::new()), None)
    }

    // ============================================================
    // TREE TESTS
    // ============================================================

    #[test]
    fn test_weighted_pick_uses_prefix_ranges() {
        let dc = NodeId::from("dc");
        let rack = NodeId::from("rack");
        let a = DataNode::new("10.0.0.1", 1, "", 1, dc.clone(), rack.clone());
        let b = DataNode::new("10.0.0.2", 1, "", 2, dc.clone(), rack.clone());
        let c = DataNode::new("10.0.0.3", 1, "", 3, dc, rack);
        let candidates = vec![&a, &b, &c];

        let pick = |draw| weighted_pick(&candidates, draw).map(|(n, rest)| (n.ip.clone(), rest));

        assert_eq!(pick(0), Some(("10.0.0.1".to_string(), 0)));
        assert_eq!(pick(1), Some(("10.0.0.2".to_string(), 0)));
        assert_eq!(pick(2), Some(("10.0.0.2".to_string(), 1)));
        assert_eq!(pick(3), Some(("10.0.0.3".to_string(), 0)));
        assert_eq!(pick(5), Some(("10.0.0.3".to_string(), 2)));
        assert_eq!(pick(6), None);
        assert_eq!(pick(-1), None);
    }

    #[test]
    fn test_weighted_pick_skips_full_candidates() {
        let dc = NodeId::from("dc");
        let rack = NodeId::from("rack");
        let full = DataNode::new("10.0.0.1", 1, "", 0, dc.clone(), rack.clone());
        let free = DataNode::new("10.0.0.2", 1, "", 2, dc, rack);
        let candidates = vec![&full, &free];

        for draw in 0..2 {
            let (node, _) = weighted_pick(&candidates, draw).unwrap();
            assert_eq!(node.ip, "10.0.0.2");
        }
    }

    #[test]
    fn test_free_space_aggregates_over_tree() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 3, "dc1", "r1", vec![volume(1, "", "000")]), "dc1", "r1");
        state.register_volumes(&heartbeat(2, 4, "dc1", "r2", vec![]), "dc1", "r2");
        state.register_volumes(&heartbeat(3, 5, "dc2", "r1", vec![]), "dc2", "r1");

        assert_eq!(state.free_space(), 2 + 4 + 5);
        assert_eq!(state.max_volume_count(), 12);
        assert_eq!(state.volume_count(), 1);

        let dc1 = state.data_center(&NodeId::from("dc1")).unwrap();
        assert_eq!(dc1.free_space(), 6);
        assert_eq!(dc1.children().len(), 2);
    }

    #[test]
    fn test_reserve_with_zero_capacity_fails() {
        let mut state = TopologyState::new("topo", LIMIT);
        assert!(matches!(
            state.reserve_one_volume(None, &mut rng()),
            Err(Error::NoFreeSpace(_))
        ));

        state.register_volumes(&heartbeat(1, 1, "dc1", "r1", vec![volume(1, "", "000")]), "dc1", "r1");
        assert_eq!(state.free_space(), 0);
        assert!(matches!(
            state.reserve_one_volume(None, &mut rng()),
            Err(Error::NoFreeSpace(_))
        ));
    }

    #[test]
    fn test_reserve_one_volume_consumes_slots() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 2, "dc1", "r1", vec![]), "dc1", "r1");
        let mut rng = rng();

        let (first_node, first) = state.reserve_one_volume(None, &mut rng).unwrap();
        let (second_node, second) = state.reserve_one_volume(None, &mut rng).unwrap();

        assert_eq!(first_node, node_id(1));
        assert_eq!(second_node, node_id(1));
        assert!(second > first);
        assert_eq!(state.free_space(), 0);
        assert!(state.reserve_one_volume(None, &mut rng).is_err());

        state.release_reservation(&[node_id(1)], first);
        assert_eq!(state.free_space(), 1);
    }

    #[test]
    fn test_reserve_scoped_to_data_center() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 0, "dc1", "r1", vec![]), "dc1", "r1");
        state.register_volumes(&heartbeat(2, 3, "dc2", "r1", vec![]), "dc2", "r1");
        let mut rng = rng();

        assert!(state.reserve_one_volume(Some("dc1"), &mut rng).is_err());
        assert!(state.reserve_one_volume(Some("nowhere"), &mut rng).is_err());

        for _ in 0..3 {
            let (node, _) = state.reserve_one_volume(Some("dc2"), &mut rng).unwrap();
            assert_eq!(node, node_id(2));
        }
    }

    #[test]
    fn test_reserve_spreads_by_free_space() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 50, "dc1", "r1", vec![]), "dc1", "r1");
        state.register_volumes(&heartbeat(2, 50, "dc2", "r1", vec![]), "dc2", "r1");
        let mut rng = rng();

        let mut seen = HashSet::new();
        for _ in 0..40 {
            let (node, _) = state.reserve_one_volume(None, &mut rng).unwrap();
            seen.insert(node);
        }
        assert_eq!(seen.len(), 2);
    }

    // ============================================================
    // LAYOUT TESTS
    // ============================================================

    #[test]
    fn test_volume_writable_only_with_enough_replicas() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![volume(1, "", "001")]), "dc1", "r1");

        let layout = state.volume_layout("", rep("001")).unwrap();
        assert!(!layout.is_writable(VolumeId(1)));

        state.register_volumes(&heartbeat(2, 7, "dc1", "r1", vec![volume(1, "", "001")]), "dc1", "r1");
        let layout = state.volume_layout("", rep("001")).unwrap();
        assert!(layout.is_writable(VolumeId(1)));
        assert_eq!(layout.lookup(VolumeId(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_pick_for_write_returns_writable_volume() {
        let mut state = TopologyState::new("topo", LIMIT);
        let volumes = vec![volume(1, "", "000"), volume(2, "", "000"), volume(3, "", "000")];
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", volumes), "dc1", "r1");
        let mut rng = rng();

        for _ in 0..20 {
            let (vid, count, replicas) = state
                .pick_for_write("", rep("000"), 3, None, &mut rng)
                .unwrap();
            assert_eq!(count, 3);
            assert!(!replicas.is_empty());
            assert!(state.volume_layout("", rep("000")).unwrap().is_writable(vid));
        }
    }

    #[test]
    fn test_pick_for_write_without_writables_fails() {
        let mut state = TopologyState::new("topo", LIMIT);
        let result = state.pick_for_write("photos", rep("001"), 1, None, &mut rng());

        assert!(matches!(result, Err(Error::NoWritableVolumes { .. })));
    }

    #[test]
    fn test_pick_for_write_scoped_to_data_center() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![volume(1, "", "000")]), "dc1", "r1");
        state.register_volumes(&heartbeat(2, 7, "dc2", "r1", vec![volume(2, "", "000")]), "dc2", "r1");
        let mut rng = rng();

        for _ in 0..20 {
            let (vid, _, replicas) = state
                .pick_for_write("", rep("000"), 1, Some("dc2"), &mut rng)
                .unwrap();
            assert_eq!(vid, VolumeId(2));
            assert_eq!(replicas[0].url, "127.0.0.1:2");
        }

        let result = state.pick_for_write("", rep("000"), 1, Some("dc3"), &mut rng);
        assert!(matches!(result, Err(Error::NoWritableVolumes { .. })));
    }

    #[test]
    fn test_full_volume_leaves_writables() {
        let mut state = TopologyState::new("topo", LIMIT);
        let info = volume(4, "", "000");
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![info.clone()]), "dc1", "r1");

        assert!(state.set_volume_full(&info));
        assert!(!state.set_volume_full(&info));

        let layout = state.volume_layout("", rep("000")).unwrap();
        assert!(!layout.is_writable(VolumeId(4)));
        assert!(layout.is_full(VolumeId(4)));
        assert!(state.lookup("", VolumeId(4)).is_some());
    }

    #[test]
    fn test_read_only_and_oversized_volumes_are_not_writable() {
        let mut state = TopologyState::new("topo", LIMIT);
        let mut frozen = volume(1, "", "000");
        frozen.read_only = true;
        let mut big = volume(2, "", "000");
        big.size = LIMIT;
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![frozen, big]), "dc1", "r1");

        let layout = state.volume_layout("", rep("000")).unwrap();
        assert!(layout.writables().is_empty());
        assert_eq!(layout.volume_ids().count(), 2);
    }

    #[test]
    fn test_lookup_searches_all_collections() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(
            &heartbeat(1, 7, "dc1", "r1", vec![volume(5, "photos", "000")]),
            "dc1",
            "r1",
        );

        assert!(state.lookup("", VolumeId(5)).is_some());
        assert!(state.lookup("photos", VolumeId(5)).is_some());
        assert!(state.lookup("videos", VolumeId(5)).is_none());
        assert!(state.lookup("", VolumeId(6)).is_none());
    }

    // ============================================================
    // MEMBERSHIP CASCADE TESTS
    // ============================================================

    #[test]
    fn test_dead_node_cascades_out_of_layouts() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(
            &heartbeat(1, 7, "dc1", "r1", vec![volume(1, "", "001"), volume(2, "", "000")]),
            "dc1",
            "r1",
        );
        state.register_volumes(&heartbeat(2, 7, "dc1", "r1", vec![volume(1, "", "001")]), "dc1", "r1");
        assert!(state.volume_layout("", rep("001")).unwrap().is_writable(VolumeId(1)));

        assert!(state.mark_dead(&node_id(1)));
        assert!(!state.mark_dead(&node_id(1)));

        assert!(state.is_dead(&node_id(1)));
        assert!(state.data_node(&node_id(1)).is_none());
        assert!(!state.volume_layout("", rep("001")).unwrap().is_writable(VolumeId(1)));
        assert_eq!(urls(&state.lookup("", VolumeId(1)).unwrap()), vec!["127.0.0.1:2"]);

        // only replica gone: the volume is forgotten
        assert!(state.lookup("", VolumeId(2)).is_none());
        assert!(!state.volume_layout("", rep("000")).unwrap().is_writable(VolumeId(2)));
        assert_eq!(state.free_space(), 6);
    }

    #[test]
    fn test_recovered_node_is_registered_again() {
        let mut state = TopologyState::new("topo", LIMIT);
        let a = heartbeat(1, 7, "dc1", "r1", vec![volume(1, "", "001")]);
        state.register_volumes(&a, "dc1", "r1");
        state.register_volumes(&heartbeat(2, 7, "dc1", "r1", vec![volume(1, "", "001")]), "dc1", "r1");
        state.mark_dead(&node_id(1));

        let registration = state.register_volumes(&a, "dc1", "r1");

        assert!(registration.recovered);
        assert!(!state.is_dead(&node_id(1)));
        assert!(state.volume_layout("", rep("001")).unwrap().is_writable(VolumeId(1)));
        assert!(state.reregister_data_node(&node_id(1)));
        assert_eq!(state.lookup("", VolumeId(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_unreported_volumes_are_dropped() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(
            &heartbeat(1, 7, "dc1", "r1", vec![volume(1, "", "000"), volume(2, "", "000")]),
            "dc1",
            "r1",
        );
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![volume(1, "", "000")]), "dc1", "r1");

        assert!(state.lookup("", VolumeId(1)).is_some());
        assert!(state.lookup("", VolumeId(2)).is_none());
        assert_eq!(state.volume_count(), 1);
    }

    #[test]
    fn test_initial_report_evicts_previous_registration() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![volume(5, "", "000")]), "dc1", "r1");

        let mut restarted = heartbeat(1, 7, "dc1", "r2", vec![volume(6, "", "000")]);
        restarted.is_initial = true;
        state.register_volumes(&restarted, "dc1", "r2");

        assert!(state.lookup("", VolumeId(5)).is_none());
        assert!(state.lookup("", VolumeId(6)).is_some());

        let dc = state.data_center(&NodeId::from("dc1")).unwrap();
        assert_eq!(dc.rack(&NodeId::from("r1")).unwrap().data_nodes().count(), 0);
        assert_eq!(dc.rack(&NodeId::from("r2")).unwrap().data_nodes().count(), 1);
    }

    #[test]
    fn test_duplicate_volume_id_is_rejected() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![volume(3, "", "000")]), "dc1", "r1");

        let registration = state.register_volumes(
            &heartbeat(2, 7, "dc1", "r1", vec![volume(3, "photos", "000")]),
            "dc1",
            "r1",
        );
        assert_eq!(registration.rejected, vec![VolumeId(3)]);

        let registration =
            state.register_volumes(&heartbeat(3, 7, "dc1", "r1", vec![volume(3, "", "001")]), "dc1", "r1");
        assert_eq!(registration.rejected, vec![VolumeId(3)]);

        assert!(state.lookup("photos", VolumeId(3)).is_none());
        assert_eq!(urls(&state.lookup("", VolumeId(3)).unwrap()), vec!["127.0.0.1:1"]);
        assert!(matches!(
            state.register_volume_layout(&volume(3, "photos", "000"), &node_id(2)),
            Err(Error::DuplicateVolume { .. })
        ));
    }

    #[test]
    fn test_oversized_report_is_flagged_full() {
        let mut state = TopologyState::new("topo", LIMIT);
        let mut info = volume(8, "", "000");
        info.size = LIMIT + 1;

        let registration =
            state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![info.clone()]), "dc1", "r1");
        assert_eq!(registration.full_volumes, vec![info.clone()]);

        state.set_volume_full(&info);
        let registration =
            state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![info]), "dc1", "r1");
        assert!(registration.full_volumes.is_empty());
    }

    #[test]
    fn test_volume_ids_continue_after_reported_maximum() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 20, "dc1", "r1", vec![volume(9, "", "000")]), "dc1", "r1");

        assert_eq!(state.max_volume_id(), VolumeId(9));
        assert_eq!(state.next_volume_id(), VolumeId(10));
    }

    #[test]
    fn test_stale_data_nodes() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![]), "dc1", "r1");

        assert!(state.stale_data_nodes(Duration::from_secs(60)).is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(state.stale_data_nodes(Duration::from_millis(10)), vec![node_id(1)]);
    }

    #[test]
    fn test_status_dump() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![volume(1, "", "000")]), "dc1", "r1");
        state.register_volumes(&heartbeat(2, 7, "dc2", "r1", vec![]), "dc2", "r1");

        let status = state.status();
        assert_eq!(status.max_volume_id, VolumeId(1));
        assert_eq!(status.tree.free, 13);
        assert_eq!(status.tree.children.len(), 2);
        assert_eq!(status.tree.children[0].children[0].children[0].volumes, 1);
        assert_eq!(status.layouts.len(), 1);
        assert_eq!(status.layouts[0].writables, vec![VolumeId(1)]);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["tree"]["level"], "Topology");
        assert_eq!(json["layouts"][0]["replication"], "000");
    }

    // ============================================================
    // GROWTH TESTS
    // ============================================================

    #[test]
    fn test_find_empty_slots_honours_replication() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![]), "dc1", "r1");
        state.register_volumes(&heartbeat(2, 7, "dc1", "r1", vec![]), "dc1", "r1");
        state.register_volumes(&heartbeat(3, 7, "dc1", "r2", vec![]), "dc1", "r2");
        state.register_volumes(&heartbeat(4, 7, "dc2", "r1", vec![]), "dc2", "r1");
        let mut rng = rng();

        for _ in 0..10 {
            let nodes = find_empty_slots(&state, rep("111"), None, &mut rng).unwrap();
            assert_eq!(nodes.len(), 4);
            assert_eq!(nodes.iter().collect::<HashSet<_>>().len(), 4);

            let placed: Vec<(String, String)> = nodes
                .iter()
                .map(|id| {
                    let node = state.data_node(id).unwrap();
                    (node.data_center.to_string(), node.rack.to_string())
                })
                .collect();
            assert_eq!(placed[0], pair("dc1", "r1"));
            assert_eq!(placed[1], pair("dc1", "r1"));
            assert_eq!(placed[2], pair("dc1", "r2"));
            assert_eq!(placed[3].0, "dc2");
        }
    }

    #[test]
    fn test_find_empty_slots_needs_enough_racks() {
        let mut state = TopologyState::new("topo", LIMIT);
        state.register_volumes(&heartbeat(1, 7, "dc1", "r1", vec![]), "dc1", "r1");
        state.register_volumes(&heartbeat(2, 7, "dc1", "r1", vec![]), "dc1", "r1");
        let mut rng = rng();

        assert!(find_empty_slots(&state, rep("010"), None, &mut rng).is_err());
        assert!(find_empty_slots(&state, rep("100"), None, &mut rng).is_err());
        assert!(find_empty_slots(&state, rep("002"), None, &mut rng).is_err());
        assert_eq!(find_empty_slots(&state, rep("001"), None, &mut rng).unwrap().len(), 2);
        assert!(find_empty_slots(&state, rep("000"), Some("dc2"), &mut rng).is_err());
    }

    #[test]
    fn test_growth_target_counts() {
        assert_eq!(VolumeGrowth::target_count(rep("000")), 7);
        assert_eq!(VolumeGrowth::target_count(rep("001")), 6);
        assert_eq!(VolumeGrowth::target_count(rep("010")), 6);
        assert_eq!(VolumeGrowth::target_count(rep("011")), 3);
        assert_eq!(VolumeGrowth::target_count(rep("200")), 3);
    }

    #[tokio::test]
    async fn test_growth_allocates_and_registers_volumes() {
        let (topology, _receivers) = new_topology(LIMIT, Duration::from_secs(5));
        let allocator = Arc::new(StoreAllocator::new());
        let stores: Vec<Arc<Store>> = (1..=2)
            .map(|port| Store::new("127.0.0.1", port, &format!("localhost:{}", port), 7))
            .collect();
        for (i, store) in stores.iter().enumerate() {
            allocator.add_store(store.clone());
            topology
                .register_volumes(&heartbeat(i as u16 + 1, 7, "", "", vec![]))
                .await;
        }
        let growth = VolumeGrowth::new(allocator);

        let grown = growth
            .grow_if_needed(&topology, "", rep("001"), None)
            .await
            .unwrap();

        assert_eq!(grown, 6);
        for store in &stores {
            assert_eq!(store.volume_count(), 6);
        }
        let writables = topology
            .read(|state| state.volume_layout("", rep("001")).unwrap().writables().len())
            .await;
        assert_eq!(writables, 6);

        let again = growth
            .grow_if_needed(&topology, "", rep("001"), None)
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(topology.read(|state| state.free_space()).await, 2);
    }

    struct FailingAllocator;

    #[async_trait]
    impl VolumeAllocator for FailingAllocator {
        async fn allocate(
            &self,
            node: &Location,
            _vid: VolumeId,
            _collection: &str,
            _replication: ReplicationType,
        ) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("{} refused", node.url))
        }
    }

    #[tokio::test]
    async fn test_failed_growth_releases_reservations() {
        let (topology, _receivers) = new_topology(LIMIT, Duration::from_secs(5));
        topology.register_volumes(&heartbeat(1, 3, "", "", vec![])).await;
        let growth = VolumeGrowth::new(Arc::new(FailingAllocator));

        let result = growth.grow_by_count(&topology, 2, "", rep("000"), None).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(topology.read(|state| state.free_space()).await, 3);
        assert!(topology.lookup("", VolumeId(1)).await.is_none());
    }

    /// Evicts one server from the master while its volume is being created.
    struct EvictingAllocator {
        topology: Arc<Topology>,
        victim: NodeId,
    }

    #[async_trait]
    impl VolumeAllocator for EvictingAllocator {
        async fn allocate(
            &self,
            node: &Location,
            _vid: VolumeId,
            _collection: &str,
            _replication: ReplicationType,
        ) -> anyhow::Result<()> {
            if NodeId::from(node.url.as_str()) == self.victim {
                self.topology
                    .write(|state| state.mark_dead(&self.victim))
                    .await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_growth_skips_node_evicted_during_allocation() {
        let (topology, _receivers) = new_topology(LIMIT, Duration::from_secs(5));
        topology.register_volumes(&heartbeat(1, 1, "", "", vec![])).await;
        topology.register_volumes(&heartbeat(2, 1, "", "", vec![])).await;
        let growth = VolumeGrowth::new(Arc::new(EvictingAllocator {
            topology: topology.clone(),
            victim: node_id(2),
        }));

        let grown = growth.grow_by_count(&topology, 1, "", rep("001"), None).await.unwrap();
        assert_eq!(grown, 1);

        let locations = topology.lookup("", VolumeId(1)).await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].url, "127.0.0.1:1");
        let writable = topology
            .read(|state| state.volume_layout("", rep("001")).unwrap().is_writable(VolumeId(1)))
            .await;
        assert!(!writable);
    }

    // ============================================================
    // TOPOLOGY (LOCKED) TESTS
    // ============================================================

    #[tokio::test]
    async fn test_pick_for_write_mints_consecutive_keys() {
        let (topology, _receivers) = new_topology(LIMIT, Duration::from_secs(5));
        topology
            .register_volumes(&heartbeat(1, 7, "", "", vec![volume(1, "", "000")]))
            .await;

        let first = topology.pick_for_write("", rep("000"), 5, None).await.unwrap();
        let second = topology.pick_for_write("", rep("000"), 1, None).await.unwrap();

        assert_eq!(first.fid.volume_id, VolumeId(1));
        assert_eq!(first.count, 5);
        assert_eq!(second.fid.key, first.fid.key + 5);
        assert_eq!(first.location.url, "127.0.0.1:1");
        assert_eq!(first.location.public_url, "localhost:1");
    }

    #[tokio::test]
    async fn test_reported_keys_advance_the_sequencer() {
        let (topology, _receivers) = new_topology(LIMIT, Duration::from_secs(5));
        let mut info = volume(1, "", "000");
        info.max_file_key = 500;
        topology.register_volumes(&heartbeat(1, 7, "", "", vec![info])).await;

        let assignment = topology.pick_for_write("", rep("000"), 1, None).await.unwrap();
        assert!(assignment.fid.key > 500);
    }

    #[tokio::test]
    async fn test_heartbeats_raise_membership_events() {
        let (topology, mut receivers) = new_topology(LIMIT, Duration::from_millis(10));
        let mut full = volume(2, "", "000");
        full.size = LIMIT;
        let report = heartbeat(1, 7, "", "", vec![full.clone()]);

        topology.register_volumes(&report).await;
        assert_eq!(receivers.try_recv(), Some(MembershipEvent::VolumeFull(full.clone())));

        topology.apply_event(MembershipEvent::VolumeFull(full.clone())).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        topology.apply_event(MembershipEvent::Dead(node_id(1))).await;
        assert!(topology.lookup("", VolumeId(2)).await.is_none());

        topology.register_volumes(&report).await;
        let mut events = Vec::new();
        while let Some(event) = receivers.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&MembershipEvent::Recovered(node_id(1))));
        assert!(topology.lookup("", VolumeId(2)).await.is_some());
    }

    #[tokio::test]
    async fn test_dead_event_spares_a_node_that_reported_again() {
        let (topology, _receivers) = new_topology(LIMIT, Duration::from_millis(10));
        let report = heartbeat(1, 7, "", "", vec![volume(3, "", "000")]);
        topology.register_volumes(&report).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(topology.stale_data_nodes().await, vec![node_id(1)]);

        // heartbeat lands between detection and the consumer
        topology.register_volumes(&report).await;
        topology.apply_event(MembershipEvent::Dead(node_id(1))).await;

        assert!(!topology.read(|state| state.is_dead(&node_id(1))).await);
        assert!(topology.lookup("", VolumeId(3)).await.is_some());
    }

    #[tokio::test]
    async fn test_default_location_names() {
        let (topology, _receivers) = new_topology(LIMIT, Duration::from_secs(5));
        topology.register_volumes(&heartbeat(1, 7, "", "", vec![])).await;

        let placed = topology
            .read(|state| {
                let node = state.data_node(&node_id(1)).unwrap();
                (node.data_center.to_string(), node.rack.to_string())
            })
            .await;
        assert_eq!(placed, pair("DefaultDataCenter", "DefaultRack"));
    }

    // ============================================================
    // CONFIGURATION TESTS
    // ============================================================

    #[test]
    fn test_locate_uses_configured_ranges() {
        let json = br#"{"dataCenters":[
            {"name":"dc1","racks":[
                {"name":"r1","ips":["10.0.0.0/24"]},
                {"name":"r2","ips":["10.0.0.7","fd00::/64"]}
            ]},
            {"name":"dc2","racks":[{"name":"r9","ips":["192.168.0.0/16"]}]}
        ]}"#;
        let configuration = Configuration::from_json(json).unwrap();
        let conf = Some(&configuration);

        let loc = |ip: &str, dc: &str, rack: &str| locate(conf, ip, dc, rack);

        assert_eq!(loc("10.0.0.5", "", ""), pair("dc1", "r1"));
        // the single address is more specific than the /24
        assert_eq!(loc("10.0.0.7", "", ""), pair("dc1", "r2"));
        assert_eq!(loc("fd00::1", "", ""), pair("dc1", "r2"));
        assert_eq!(loc("192.168.40.2", "x", "y"), pair("dc2", "r9"));
        assert_eq!(loc("172.16.0.1", "dcx", "rx"), pair("dcx", "rx"));
        assert_eq!(loc("172.16.0.1", "", ""), pair("DefaultDataCenter", "DefaultRack"));
        assert_eq!(locate(None, "10.0.0.5", "", "r3"), pair("DefaultDataCenter", "r3"));
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        assert!(Configuration::from_json(b"not json").is_err());
        assert!(
            Configuration::from_json(br#"{"dataCenters":[{"name":"d","racks":[{"name":"r","ips":["10.0.0.0/40"]}]}]}"#)
                .is_err()
        );
        assert!(
            Configuration::from_json(br#"{"dataCenters":[{"name":"d","racks":[{"name":"r","ips":["nope"]}]}]}"#)
                .is_err()
        );
    }

    #[test]
    fn test_missing_configuration_file_is_not_an_error() {
        let path = std::env::temp_dir().join(format!("topology-{}.json", uuid::Uuid::new_v4()));
        assert!(Configuration::load(&path).unwrap().is_none());
    }
}
