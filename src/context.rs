//! Execution context.
//!
//! A [`Context`] carries the configuration shared by every tiled algorithm: tile size, inner
//! blocking of the orthogonal factorizations, parallelism, reduction tree shape and kernel
//! backend. It is passed explicitly to every entry point; there is no global state.

use crate::{
    error::{Error, Result},
    kernel::NativeKernels,
    sched::Region,
    tree::ReductionTree,
    Parallelism,
};
use std::sync::Arc;

const DEFAULT_TILE_SIZE: usize = 256;
const DEFAULT_INNER_BLOCK_SIZE: usize = 64;

/// Execution context of the tiled algorithms.
pub struct Context<K = NativeKernels> {
    nb: usize,
    ib: usize,
    parallelism: Parallelism,
    tree: ReductionTree,
    kernels: K,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl<K: core::fmt::Debug> core::fmt::Debug for Context<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("nb", &self.nb)
            .field("ib", &self.ib)
            .field("parallelism", &self.parallelism)
            .field("tree", &self.tree)
            .field("kernels", &self.kernels)
            .finish()
    }
}

/// Builder for [`Context`].
#[derive(Clone, Debug)]
pub struct ContextBuilder<K = NativeKernels> {
    nb: usize,
    ib: usize,
    parallelism: Parallelism,
    domain_size: usize,
    kernels: K,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            nb: DEFAULT_TILE_SIZE,
            ib: DEFAULT_INNER_BLOCK_SIZE,
            parallelism: Parallelism::Rayon(0),
            domain_size: ReductionTree::default().domain_size(),
            kernels: NativeKernels,
        }
    }
}

impl<K> ContextBuilder<K> {
    /// Sets the tile size `nb`. Tiles are `nb×nb`.
    #[inline]
    pub fn tile_size(mut self, nb: usize) -> Self {
        self.nb = nb;
        self
    }

    /// Sets the inner block size `ib` of the orthogonal factorizations.
    #[inline]
    pub fn inner_block_size(mut self, ib: usize) -> Self {
        self.ib = ib;
        self
    }

    #[inline]
    pub fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Uses `n_threads` workers. `0` selects the global rayon pool and `1` runs every task on
    /// the submitting thread.
    #[inline]
    pub fn num_threads(self, n_threads: usize) -> Self {
        self.parallelism(match n_threads {
            1 => Parallelism::None,
            n => Parallelism::Rayon(n),
        })
    }

    /// Sets the number of tiles per domain of the reduction trees.
    #[inline]
    pub fn tree_domain(mut self, domain_size: usize) -> Self {
        self.domain_size = domain_size;
        self
    }

    /// Replaces the kernel backend.
    #[inline]
    pub fn kernels<K2>(self, kernels: K2) -> ContextBuilder<K2> {
        ContextBuilder {
            nb: self.nb,
            ib: self.ib,
            parallelism: self.parallelism,
            domain_size: self.domain_size,
            kernels,
        }
    }

    /// Validates the configuration and creates the context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalValue`] for a zero tile size, inner block size or domain size, or
    /// an inner block size larger than the tile size, and [`Error::NotInitialized`] if the
    /// dedicated thread pool can't be created.
    pub fn build(self) -> Result<Context<K>> {
        if self.nb == 0 || self.ib == 0 || self.ib > self.nb {
            log::error!(
                "illegal blocking: tile size {}, inner block size {}",
                self.nb,
                self.ib
            );
            return Err(Error::IllegalValue);
        }
        if self.nb % self.ib != 0 {
            log::warn!(
                target: "tessella_perf",
                "inner block size {} does not divide tile size {}",
                self.ib,
                self.nb
            );
        }
        let tree = ReductionTree::new(self.domain_size)?;

        let pool = match self.parallelism {
            Parallelism::Rayon(n_threads) if n_threads > 0 => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n_threads)
                    .thread_name(|idx| format!("tessella-{idx}"))
                    .build()
                    .map_err(|err| {
                        log::error!("failed to create the thread pool: {err}");
                        Error::NotInitialized
                    })?,
            )),
            _ => None,
        };

        Ok(Context {
            nb: self.nb,
            ib: self.ib,
            parallelism: self.parallelism,
            tree,
            kernels: self.kernels,
            pool,
        })
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            log::error!("{name}: expected a non negative integer, found {value:?}");
            Error::IllegalValue
        }),
        Err(_) => Ok(None),
    }
}

impl Context {
    /// Returns a builder with the default configuration.
    #[inline]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Creates a context with the default configuration, overridden by the environment variables
    /// `TESSELLA_NB`, `TESSELLA_IB`, `TESSELLA_NUM_THREADS` and `TESSELLA_TREE_DOMAIN`.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(nb) = env_usize("TESSELLA_NB")? {
            builder = builder.tile_size(nb);
        }
        if let Some(ib) = env_usize("TESSELLA_IB")? {
            builder = builder.inner_block_size(ib);
        }
        if let Some(n_threads) = env_usize("TESSELLA_NUM_THREADS")? {
            builder = builder.num_threads(n_threads);
        }
        if let Some(domain_size) = env_usize("TESSELLA_TREE_DOMAIN")? {
            builder = builder.tree_domain(domain_size);
        }
        builder.build()
    }
}

impl<K> Context<K> {
    /// Tile size.
    #[inline]
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Inner block size of the orthogonal factorizations.
    #[inline]
    pub fn ib(&self) -> usize {
        self.ib
    }

    #[inline]
    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    #[inline]
    pub fn tree(&self) -> &ReductionTree {
        &self.tree
    }

    #[inline]
    pub fn kernels(&self) -> &K {
        &self.kernels
    }

    /// Opens a scheduling region, passes it to `f`, and waits for every task submitted to it.
    ///
    /// With [`Parallelism::None`], tasks are executed as they are submitted. Otherwise they run
    /// on the dedicated pool of the context, or on the global rayon pool.
    pub fn region<'scope, R: Send>(
        &self,
        f: impl for<'r> FnOnce(&Region<'r, 'scope>) -> R + Send,
    ) -> R {
        fn run<'r, 'scope, R>(
            scope: Option<&'r rayon::Scope<'scope>>,
            f: impl FnOnce(&Region<'r, 'scope>) -> R,
        ) -> R {
            let region = Region::new(scope);
            log::debug!("region opened");
            let out = f(&region);
            log::debug!("region draining {} tasks", region.submitted());
            out
        }

        match (self.parallelism, &self.pool) {
            (Parallelism::None, _) => run(None, f),
            (Parallelism::Rayon(_), Some(pool)) => pool.scope(move |scope| run(Some(scope), f)),
            (Parallelism::Rayon(_), None) => rayon::scope(move |scope| run(Some(scope), f)),
        }
    }
}
