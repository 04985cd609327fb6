//! End-to-end demo: two batches of protocol proofs
//!
//! Shows:
//! 1. Circuits are compiled once, keys derived
//! 2. Protocol proofs are reduced to a fixed shape
//! 3. Their identities are recorded in the indexed Merkle tree
//! 4. One aggregate proof covers the batch and the root transition
//! 5. A resubmitted proof is caught by the tree

use aggregation::{
    combined_vk_hash, leaf_value, pis_identity, protocol_vk_identity, reduction_vk_identity, AggregatorCircuit,
    Circuit, ConstraintSystem, DevBackend, ImtCircuit, ProvingBackend, ProvingKey, ReductionCircuit, ReductionResult,
    VerifyingKey,
};
use imt::{FieldBytes, Hash32, ImtError, IndexedMerkleTree, Violation};

type DemoResult<T> = Result<T, Box<dyn std::error::Error>>;

const DEPTH: usize = 9;
const BATCH: usize = 4;

struct Keys {
    cs: ConstraintSystem,
    pk: ProvingKey,
    vk: VerifyingKey,
}

fn keys<C: Circuit>(backend: &DevBackend, placeholder: &C) -> DemoResult<Keys> {
    let cs = backend.compile(placeholder)?;
    let (pk, vk) = backend.setup(&cs)?;
    println!("   {:<10} {} gates, {} public inputs", cs.name, cs.trace.gates.len(), cs.public_count);
    Ok(Keys { cs, pk, vk })
}

struct Submission {
    vk: VerifyingKey,
    proof: aggregation::Proof,
    pis: Vec<FieldBytes>,
}

fn submissions(backend: &DevBackend, round: u64) -> DemoResult<Vec<Submission>> {
    (0..BATCH)
        .map(|i| {
            let arity = 1 + (i * 5) % 20;
            let vk = backend.protocol_key(&format!("protocol-{i}"), arity, 0);
            let pis: Vec<FieldBytes> = (0..arity as u64).map(|j| FieldBytes::from_u64(round * 100 + j)).collect();
            let proof = backend.protocol_proof(&vk, &pis)?;
            Ok(Submission { vk, proof, pis })
        })
        .collect()
}

fn short(h: &Hash32) -> String {
    format!("0x{}…", &hex::encode(h)[..16])
}

fn run_batch(
    backend: &DevBackend,
    tree: &mut IndexedMerkleTree,
    reduction: &Keys,
    imt: &Keys,
    agg: &Keys,
    batch: &[Submission],
) -> DemoResult<()> {
    let reduction_vk_hash = reduction_vk_identity(&reduction.vk)?;
    let mut vk_hashes = Vec::new();
    let mut pis_hashes = Vec::new();
    let mut combined = Vec::new();
    let mut reductions = Vec::new();

    for s in batch {
        let circuit = ReductionCircuit::new(s.vk.clone(), s.proof.clone(), s.pis.clone())?;
        let (proof, public) = backend.prove(&reduction.cs, &reduction.pk, &circuit)?;
        println!("   reduced a proof with {:>2} public inputs", s.pis.len());

        let vk_hash = protocol_vk_identity(&s.vk)?;
        combined.push(combined_vk_hash(&vk_hash, &reduction_vk_hash));
        vk_hashes.push(vk_hash);
        pis_hashes.push(pis_identity(&s.pis)?);
        reductions.push(ReductionResult { proof, public: [public[0], public[1]] });
    }

    let leaves: Vec<Hash32> = combined.iter().zip(&pis_hashes).map(|(c, p)| leaf_value(c, p)).collect();
    let witness = tree.insert_batch(&leaves)?;
    let (old_root, new_root) = (witness.old_root, witness.new_root);
    println!("   tree {} → {} (next free slot {})", short(&old_root), short(&new_root), tree.next_free());

    let imt_circuit = ImtCircuit::from_batch(DEPTH, combined, pis_hashes.clone(), witness)?;
    let (imt_proof, imt_public) = backend.prove(&imt.cs, &imt.pk, &imt_circuit)?;

    let agg_circuit = AggregatorCircuit::new(
        vk_hashes,
        pis_hashes,
        reduction.vk.clone(),
        reductions,
        imt.vk.clone(),
        imt_proof,
        [imt_public[0], imt_public[1]],
        old_root,
        new_root,
    )?;
    let (proof, public) = backend.prove(&agg.cs, &agg.pk, &agg_circuit)?;
    let ok = backend.verify(&proof, &agg.vk, &public)?;
    println!("   aggregate public inputs: {} / {}", public[0], public[1]);
    println!("   {} aggregate proof verifies: {ok}\n", if ok { "✓" } else { "✗" });
    Ok(())
}

fn main() -> DemoResult<()> {
    println!("╔════════════════════════════════════════════════╗");
    println!("║  Proof Aggregation - End-to-End Demo          ║");
    println!("║  Indexed Merkle Tree + Reduction + Aggregator ║");
    println!("╚════════════════════════════════════════════════╝\n");

    let backend = DevBackend::new();

    println!("🔧 Step 1: Build circuits (depth {DEPTH}, batch {BATCH})");
    println!("   ─────────────────────────────────");
    let reduction = keys(&backend, &ReductionCircuit::placeholder(0))?;
    let imt = keys(&backend, &ImtCircuit::placeholder(DEPTH, BATCH))?;
    let agg = keys(&backend, &AggregatorCircuit::placeholder(BATCH))?;
    println!();

    let mut tree = IndexedMerkleTree::new(DEPTH)?;
    println!("🌱 Step 2: Empty tree root {}\n", short(&tree.root()));

    println!("📦 Step 3: First batch");
    println!("   ─────────────────────────────────");
    let first = submissions(&backend, 1)?;
    run_batch(&backend, &mut tree, &reduction, &imt, &agg, &first)?;

    println!("📦 Step 4: Second batch chains from the first root");
    println!("   ─────────────────────────────────");
    run_batch(&backend, &mut tree, &reduction, &imt, &agg, &submissions(&backend, 2)?)?;

    println!("🔁 Step 5: Resubmit the first batch");
    println!("   ─────────────────────────────────");
    let before = tree.root();
    match run_batch(&backend, &mut tree, &reduction, &imt, &agg, &first) {
        Err(e) if matches!(e.downcast_ref::<ImtError>(), Some(ImtError::Constraint(Violation::NonMembership))) => {
            println!("   ✓ rejected: {e}");
        }
        Err(e) => return Err(e),
        Ok(()) => println!("   ✗ resubmission was accepted"),
    }
    println!("   root unchanged: {}\n", tree.root() == before);

    println!("✅ Done. {} proofs recorded.", tree.next_free() - 1);
    Ok(())
}
