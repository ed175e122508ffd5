pub mod topk_txt;
