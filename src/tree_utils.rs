//! B+tree traversal helpers shared by database-drop and compacting copy.

use crate::error::{Error, PageId, Result};
use crate::page::{Page, PageFlags};
use crate::txn::{Transaction, Write};
use std::collections::VecDeque;

/// Breadth-first walk collecting every page reachable from `root`,
/// including overflow chains hanging off leaf nodes.
pub fn collect_tree_pages<'txn>(
    txn: &Transaction<'txn, impl crate::txn::mode::Mode>,
    root: PageId,
) -> Result<Vec<PageId>> {
    let mut pages = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root);

    while let Some(page_id) = queue.pop_front() {
        if !visited.insert(page_id) {
            continue;
        }
        pages.push(page_id);

        let page = txn.get_page(page_id)?;

        if page.header.flags.contains(PageFlags::BRANCH) {
            let leftmost = crate::branch::BranchPage::get_leftmost_child(page)?;
            queue.push_back(leftmost);
            for i in 0..page.header.num_keys as usize {
                let node = page.node(i)?;
                queue.push_back(node.page_number()?);
            }
        } else if page.header.flags.contains(PageFlags::LEAF) {
            for i in 0..page.header.num_keys as usize {
                let node = page.node(i)?;
                if let Some(overflow_id) = node.overflow_page()? {
                    pages.extend(collect_overflow_chain(txn, overflow_id)?);
                }
            }
        }
    }

    Ok(pages)
}

fn collect_overflow_chain<'txn>(
    txn: &Transaction<'txn, impl crate::txn::mode::Mode>,
    start: PageId,
) -> Result<Vec<PageId>> {
    let mut pages = Vec::new();
    let mut current = start;

    loop {
        pages.push(current);
        let page = txn.get_page(current)?;
        if !page.header.flags.contains(PageFlags::OVERFLOW) {
            return Err(Error::Corrupted {
                details: "expected overflow page in chain".into(),
                page_id: Some(current),
            });
        }
        let next = PageId(page.header.overflow as u64);
        if next.0 == 0 {
            break;
        }
        current = next;
    }

    Ok(pages)
}

/// Free every page reachable from `root` — used by `drop_database`.
pub fn free_tree(txn: &mut Transaction<'_, Write>, root: PageId) -> Result<()> {
    for page_id in collect_tree_pages(txn, root)? {
        txn.free_page(page_id)?;
    }
    Ok(())
}

/// Breadth-first walk applying `f` to each page, used by the compacting
/// copy to emit pages in a stable traversal order.
pub fn traverse_tree<F>(
    txn: &Transaction<'_, impl crate::txn::mode::Mode>,
    root: PageId,
    mut f: F,
) -> Result<()>
where
    F: FnMut(PageId, &Page) -> Result<()>,
{
    let mut queue = VecDeque::new();
    let mut visited = std::collections::HashSet::new();
    queue.push_back(root);

    while let Some(page_id) = queue.pop_front() {
        if !visited.insert(page_id) {
            continue;
        }

        let page = txn.get_page(page_id)?;
        f(page_id, page)?;

        if page.header.flags.contains(PageFlags::BRANCH) {
            let leftmost = crate::branch::BranchPage::get_leftmost_child(page)?;
            queue.push_back(leftmost);
            for i in 0..page.header.num_keys as usize {
                let node = page.node(i)?;
                queue.push_back(node.page_number()?);
            }
        }
    }

    Ok(())
}
